//! Recognition capture loop.
//!
//! One tick captures a frame, submits it to the backend and applies the
//! reply to the display surface. The loop never queues: while a cycle
//! is in flight, further ticks are dropped, so at most one request is
//! outstanding at any time.
//!
//! The recognition loop is responsible for:
//! - Driving capture, submit and apply as a single cycle
//! - Updating the stability indicator on every applied cycle
//! - Painting annotated frames into the current display box
//! - Discarding replies that started before a session reset
//!
//! The recognition loop MUST NOT:
//! - Open prompts; pending detections are the confirmation poller's job
//! - Pace itself; the runner supplies the cadence

use std::sync::{Arc, Mutex};

use crate::backend::{BackendClient, ProcessFrameResponse};
use crate::config::TimerSettings;
use crate::cycle::{self, Completion, CycleGate, CycleStats, LoopHandle, Pacing, TickOutcome};
use crate::display::{self, SharedSurface};
use crate::frame::FramePayload;
use crate::source::FrameSource;
use crate::stability;
use crate::{EpochCounter, SessionMode};

/// Capture-submit-apply cycle against the recognition backend.
pub struct RecognitionLoop {
    client: BackendClient,
    source: FrameSource,
    gate: CycleGate,
    epochs: EpochCounter,
    surface: SharedSurface,
}

impl RecognitionLoop {
    pub fn new(
        client: BackendClient,
        source: FrameSource,
        epochs: EpochCounter,
        surface: SharedSurface,
    ) -> Self {
        Self {
            client,
            source,
            gate: CycleGate::new(),
            epochs,
            surface,
        }
    }

    /// Cadence for the given session mode. Local capture runs on a fixed
    /// interval; snapshot capture waits out the redelay after each cycle
    /// completes, since fetch time varies.
    pub fn pacing(mode: SessionMode, timers: &TimerSettings) -> Pacing {
        match mode {
            SessionMode::Local => Pacing::FixedInterval(timers.recognition_interval),
            SessionMode::Snapshot => Pacing::DelayAfterCompletion {
                initial: timers.snapshot_initial_delay,
                delay: timers.snapshot_redelay,
            },
        }
    }

    /// Runs one cycle. Returns what happened so runners can log it.
    pub fn tick(&mut self) -> TickOutcome {
        let epoch = self.epochs.current();
        if !self.gate.try_begin(epoch) {
            log::debug!("RecognitionLoop: tick dropped, cycle in flight");
            return TickOutcome::DroppedBusy;
        }

        let payload = match self.source.acquire_frame() {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("RecognitionLoop: capture failed: {:#}", err);
                self.gate.finish(self.epochs.current());
                return TickOutcome::SkippedCapture;
            }
        };

        let response = match self.client.process_frame(&payload) {
            Ok(response) => response,
            Err(err) => {
                log::debug!("RecognitionLoop: submit failed: {:#}", err);
                self.gate.finish(self.epochs.current());
                return TickOutcome::SkippedSubmit;
            }
        };

        if self.gate.finish(self.epochs.current()) == Completion::Stale {
            return TickOutcome::DiscardedStale;
        }
        self.apply(response)
    }

    /// Applies a fresh reply. The indicator updates on every applied
    /// cycle, whether or not an annotated frame arrived.
    fn apply(&mut self, response: ProcessFrameResponse) -> TickOutcome {
        let indicator = stability::project(response.ui.as_ref());
        let mut surface = display::lock(&self.surface);
        surface.render_stability(&indicator);

        let Some(processed) = response.processed_frame else {
            return TickOutcome::Applied;
        };
        let payload = match FramePayload::from_data_uri(processed) {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("RecognitionLoop: bad processed frame: {:#}", err);
                return TickOutcome::SkippedDecode;
            }
        };
        let (width, height) = match self.source.display_box() {
            Some(fixed) => fixed,
            None => match payload.decode() {
                Ok(frame) => (frame.width(), frame.height()),
                Err(err) => {
                    log::debug!("RecognitionLoop: undecodable processed frame: {:#}", err);
                    return TickOutcome::SkippedDecode;
                }
            },
        };
        // Size the overlay right before painting so a resized surface
        // never shows a frame in last cycle's box.
        surface.resize_overlay(width, height);
        surface.paint_processed_frame(&payload, width, height);
        TickOutcome::Applied
    }

    /// Spawns a runner thread that ticks the shared loop.
    pub fn spawn(shared: Arc<Mutex<Self>>, pacing: Pacing) -> LoopHandle {
        cycle::spawn_loop("recognition", pacing, move || {
            let outcome = {
                let mut guard = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.tick()
            };
            log::trace!("RecognitionLoop: tick -> {:?}", outcome);
        })
    }

    pub fn stats(&self) -> CycleStats {
        self.gate.stats()
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Mutable access for viewport updates from the surface owner.
    pub fn source_mut(&mut self) -> &mut FrameSource {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pacing_follows_session_mode() {
        let timers = TimerSettings::default();
        assert_eq!(
            RecognitionLoop::pacing(SessionMode::Local, &timers),
            Pacing::FixedInterval(Duration::from_millis(100))
        );
        assert_eq!(
            RecognitionLoop::pacing(SessionMode::Snapshot, &timers),
            Pacing::DelayAfterCompletion {
                initial: Duration::from_millis(400),
                delay: Duration::from_millis(200),
            }
        );
    }
}
