//! Cycle gating and loop plumbing.
//!
//! Every kiosk activity runs as a timer-driven loop of capture-submit-apply
//! cycles. This module owns the two rules all of them share:
//!
//! - at most one cycle in flight per loop; extra ticks are dropped
//! - a completion is applied only if its session epoch is still current
//!
//! plus the thread scaffolding that turns a tick function into a paced
//! background loop with a stoppable handle.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::SessionEpoch;

/// Whether a loop currently has a cycle in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    InFlight,
}

/// How a finished cycle relates to the session that is current now.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    Fresh,
    Stale,
}

/// What one driver tick amounted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The cycle ran and its result reached the surface.
    Applied,
    /// A cycle was already in flight; this tick was dropped.
    DroppedBusy,
    /// The flow is not in a state that runs cycles right now.
    SkippedInactive,
    /// Frame acquisition failed; nothing was submitted.
    SkippedCapture,
    /// The backend call failed or returned an unusable body.
    SkippedSubmit,
    /// The processed frame could not be decoded for painting.
    SkippedDecode,
    /// The cycle finished after a session reset and was discarded.
    DiscardedStale,
}

/// Counters a loop exposes for health logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub ticks_dropped: u64,
    pub cycles_finished: u64,
    pub cycles_stale: u64,
}

/// The in-flight guard. One per loop, owned by the loop itself.
#[derive(Debug)]
pub struct CycleGate {
    state: CycleState,
    started_epoch: Option<SessionEpoch>,
    stats: CycleStats,
}

impl Default for CycleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleGate {
    pub fn new() -> Self {
        Self {
            state: CycleState::Idle,
            started_epoch: None,
            stats: CycleStats::default(),
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Tries to open a cycle for this tick. Returns false (and counts a
    /// dropped tick) if one is already in flight.
    pub fn try_begin(&mut self, epoch: SessionEpoch) -> bool {
        match self.state {
            CycleState::Idle => {
                self.state = CycleState::InFlight;
                self.started_epoch = Some(epoch);
                true
            }
            CycleState::InFlight => {
                self.stats.ticks_dropped += 1;
                false
            }
        }
    }

    /// Closes the in-flight cycle and reports whether its result may be
    /// applied. Finishing without a begin is a driver bug; it reports stale
    /// so nothing gets applied.
    pub fn finish(&mut self, current: SessionEpoch) -> Completion {
        let started = self.started_epoch.take();
        let was_in_flight = self.state == CycleState::InFlight;
        self.state = CycleState::Idle;
        match started {
            Some(epoch) if was_in_flight && epoch == current => {
                self.stats.cycles_finished += 1;
                Completion::Fresh
            }
            _ => {
                self.stats.cycles_stale += 1;
                Completion::Stale
            }
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }
}

// -------------------- Pacing and loop threads --------------------

/// How a loop schedules its ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pacing {
    /// Tick on a fixed cadence regardless of how long cycles take. A cycle
    /// that overruns the period simply absorbs the next tick as a drop.
    FixedInterval(Duration),
    /// Wait `initial` once, then re-arm `delay` after each tick finishes.
    /// Used where the capture itself goes over the network and pacing from
    /// completion avoids hammering the snapshot endpoint.
    DelayAfterCompletion { initial: Duration, delay: Duration },
}

/// Handle to a running loop thread. `stop` asks the loop to wind down and
/// joins it.
pub struct LoopHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("{} loop thread panicked", self.name))?;
        }
        Ok(())
    }
}

/// Runs `tick` on its own thread under the given pacing until the handle is
/// stopped.
pub fn spawn_loop<F>(name: &'static str, pacing: Pacing, mut tick: F) -> LoopHandle
where
    F: FnMut() + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let join = thread::spawn(move || {
        log::debug!("{} loop started ({:?})", name, pacing);
        match pacing {
            Pacing::FixedInterval(period) => {
                while !flag.load(Ordering::SeqCst) {
                    let started = Instant::now();
                    tick();
                    let elapsed = started.elapsed();
                    if elapsed < period {
                        sleep_unless_stopped(&flag, period - elapsed);
                    }
                }
            }
            Pacing::DelayAfterCompletion { initial, delay } => {
                sleep_unless_stopped(&flag, initial);
                while !flag.load(Ordering::SeqCst) {
                    tick();
                    sleep_unless_stopped(&flag, delay);
                }
            }
        }
        log::debug!("{} loop stopped", name);
    });
    LoopHandle {
        name,
        shutdown,
        join: Some(join),
    }
}

/// Sleeps in 50ms slices so a stop request is honored promptly.
fn sleep_unless_stopped(flag: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !flag.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
