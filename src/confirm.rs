//! Detection confirmation.
//!
//! A background poller asks the backend for its most recent pending
//! detection and raises a confirmation prompt when one is found. The
//! operator either confirms (which books the attendance record) or
//! cancels. A newer detection replaces the prompt's contents in place,
//! except while a submission is running.
//!
//! The confirmation flow is responsible for:
//! - Polling for pending detections on the configured cadence
//! - Holding the prompt state machine (open, submitting, confirmed)
//! - Running the confirm submission and mapping every failure mode to
//!   operator-readable status text
//! - Auto-closing the prompt after a successful confirmation
//!
//! The confirmation flow MUST NOT:
//! - Capture or submit frames
//! - Keep a prompt from a previous session alive across a reset

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::backend::{AckResponse, BackendClient, ConfirmRequest, DetectionRecord};
use crate::cycle::{self, Completion, CycleGate, CycleStats, LoopHandle, Pacing, TickOutcome};
use crate::display::{self, SharedSurface};
use crate::EpochCounter;

/// Status shown while the confirm request is on the wire.
const SUBMITTING_STATUS: &str = "Registrando...";
/// Shown when the request never reached the backend.
const TRANSPORT_ERROR_STATUS: &str = "Problema de conexão ao enviar dados.";
/// Fallback body text for a non-2xx reply with an empty body.
const EMPTY_REPLY_FALLBACK: &str = "Resposta inválida do servidor.";
/// Shown when a 2xx reply was not parseable JSON.
const BAD_JSON_STATUS: &str = "Resposta inválida (JSON).";
/// Shown when the backend acknowledged the confirmation.
const CONFIRMED_STATUS: &str = "Ponto registrado com sucesso!";
/// Fallback when the backend declined without a message.
const DECLINED_FALLBACK: &str = "Falha ao registrar ponto.";

/// Where the prompt is in its lifecycle.
#[derive(Clone, Debug, PartialEq)]
pub enum PromptState {
    Closed,
    /// Showing a detection, waiting on the operator.
    Open {
        record: DetectionRecord,
        status: Option<String>,
    },
    /// Confirm request in flight. The prompt must not change under it.
    Submitting { record: DetectionRecord },
    /// Booked. Stays up until `close_at`, then closes on the next tick.
    Confirmed {
        record: DetectionRecord,
        message: String,
        close_at: Instant,
    },
}

/// What the surface renders for the prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct PromptView {
    pub record: DetectionRecord,
    pub status: Option<String>,
    /// False while submitting and after a successful confirmation.
    pub controls_enabled: bool,
}

/// Pending-detection poller plus the confirmation prompt it feeds.
pub struct ConfirmFlow {
    client: BackendClient,
    surface: SharedSurface,
    epochs: EpochCounter,
    gate: CycleGate,
    prompt: PromptState,
    autoclose: Duration,
}

impl ConfirmFlow {
    pub fn new(
        client: BackendClient,
        surface: SharedSurface,
        epochs: EpochCounter,
        autoclose: Duration,
    ) -> Self {
        Self {
            client,
            surface,
            epochs,
            gate: CycleGate::new(),
            prompt: PromptState::Closed,
            autoclose,
        }
    }

    /// Runs one poll cycle. Skips the backend entirely while a submission
    /// or a confirmed prompt holds the screen.
    pub fn poll_tick(&mut self) -> TickOutcome {
        if let PromptState::Confirmed { close_at, .. } = &self.prompt {
            if Instant::now() >= *close_at {
                self.prompt = PromptState::Closed;
                self.render();
            }
        }
        match self.prompt {
            PromptState::Submitting { .. } | PromptState::Confirmed { .. } => {
                return TickOutcome::SkippedInactive;
            }
            _ => {}
        }

        let epoch = self.epochs.current();
        if !self.gate.try_begin(epoch) {
            log::debug!("ConfirmFlow: poll dropped, cycle in flight");
            return TickOutcome::DroppedBusy;
        }
        let fetched = match self.client.last_detection() {
            Ok(fetched) => fetched,
            Err(err) => {
                log::debug!("ConfirmFlow: detection poll failed: {:#}", err);
                self.gate.finish(self.epochs.current());
                return TickOutcome::SkippedSubmit;
            }
        };
        if self.gate.finish(self.epochs.current()) == Completion::Stale {
            return TickOutcome::DiscardedStale;
        }

        // A pending detection opens (or supersedes) the prompt. Nothing
        // pending leaves whatever is on screen alone.
        if let Some(record) = fetched {
            self.prompt = PromptState::Open {
                record,
                status: None,
            };
            self.render();
        }
        TickOutcome::Applied
    }

    /// Submits the confirmation for the open prompt. Every failure mode
    /// reopens the prompt with status text; only a backend acknowledgment
    /// moves it to `Confirmed`.
    pub fn confirm(&mut self) {
        let PromptState::Open { record, .. } = self.prompt.clone() else {
            return;
        };
        self.prompt = PromptState::Submitting {
            record: record.clone(),
        };
        self.render();

        let epoch = self.epochs.current();
        let request = ConfirmRequest {
            cpf: record.cpf.clone(),
            confidence: record.confidence,
            detection_id: record.detection_id.clone(),
        };
        let reply = self.client.confirm_attendance(&request);

        // A reset while the request was on the wire orphans the reply.
        if self.epochs.current() != epoch {
            self.prompt = PromptState::Closed;
            self.render();
            return;
        }

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                log::warn!("ConfirmFlow: confirm transport error: {:#}", err);
                self.reopen(record, TRANSPORT_ERROR_STATUS.to_string());
                return;
            }
        };
        if !reply.is_success() {
            let detail = if reply.body.is_empty() {
                EMPTY_REPLY_FALLBACK
            } else {
                reply.body.as_str()
            };
            self.reopen(record, format!("Falha ({}). {}", reply.status, detail));
            return;
        }
        let ack: AckResponse = match serde_json::from_str(&reply.body) {
            Ok(ack) => ack,
            Err(err) => {
                log::warn!("ConfirmFlow: unparseable confirm reply: {}", err);
                self.reopen(record, BAD_JSON_STATUS.to_string());
                return;
            }
        };
        if ack.success {
            self.prompt = PromptState::Confirmed {
                record,
                message: CONFIRMED_STATUS.to_string(),
                close_at: Instant::now() + self.autoclose,
            };
        } else {
            let status = ack.message.unwrap_or_else(|| DECLINED_FALLBACK.to_string());
            self.prompt = PromptState::Open {
                record,
                status: Some(status),
            };
        }
        self.render();
    }

    /// Dismisses an open prompt. Ignored while submitting or confirmed.
    pub fn cancel(&mut self) {
        if matches!(self.prompt, PromptState::Open { .. }) {
            self.prompt = PromptState::Closed;
            self.render();
        }
    }

    pub fn state(&self) -> &PromptState {
        &self.prompt
    }

    /// Projects the prompt state into what the surface shows.
    pub fn view(&self) -> Option<PromptView> {
        match &self.prompt {
            PromptState::Closed => None,
            PromptState::Open { record, status } => Some(PromptView {
                record: record.clone(),
                status: status.clone(),
                controls_enabled: true,
            }),
            PromptState::Submitting { record } => Some(PromptView {
                record: record.clone(),
                status: Some(SUBMITTING_STATUS.to_string()),
                controls_enabled: false,
            }),
            PromptState::Confirmed {
                record, message, ..
            } => Some(PromptView {
                record: record.clone(),
                status: Some(message.clone()),
                controls_enabled: false,
            }),
        }
    }

    fn reopen(&mut self, record: DetectionRecord, status: String) {
        self.prompt = PromptState::Open {
            record,
            status: Some(status),
        };
        self.render();
    }

    fn render(&self) {
        let view = self.view();
        display::lock(&self.surface).render_prompt(view.as_ref());
    }

    /// Spawns a runner thread that polls the shared flow.
    pub fn spawn(shared: Arc<Mutex<Self>>, pacing: Pacing) -> LoopHandle {
        cycle::spawn_loop("confirmation", pacing, move || {
            let outcome = {
                let mut guard = shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.poll_tick()
            };
            log::trace!("ConfirmFlow: poll -> {:?}", outcome);
        })
    }

    pub fn stats(&self) -> CycleStats {
        self.gate.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{self, MemorySurface};

    fn sample_record() -> DetectionRecord {
        DetectionRecord {
            cpf: "12345678901".to_string(),
            nome: "Maria Souza".to_string(),
            matricula: "M-042".to_string(),
            horario: "2026-08-22 09:15:00".to_string(),
            confidence: Some(38.2),
            detection_id: "det-7".to_string(),
        }
    }

    fn flow_with_surface() -> (ConfirmFlow, MemorySurface) {
        let surface = MemorySurface::default();
        let client = BackendClient::new("http://127.0.0.1:1", Some(Duration::from_millis(50)))
            .expect("client");
        let flow = ConfirmFlow::new(
            client,
            display::shared(surface.clone()),
            EpochCounter::default(),
            Duration::from_millis(1000),
        );
        (flow, surface)
    }

    #[test]
    fn closed_prompt_has_no_view() {
        let (flow, _surface) = flow_with_surface();
        assert_eq!(flow.state(), &PromptState::Closed);
        assert!(flow.view().is_none());
    }

    #[test]
    fn open_prompt_enables_controls() {
        let (mut flow, _surface) = flow_with_surface();
        flow.prompt = PromptState::Open {
            record: sample_record(),
            status: None,
        };
        let view = flow.view().expect("view");
        assert!(view.controls_enabled);
        assert!(view.status.is_none());
    }

    #[test]
    fn submitting_prompt_locks_controls() {
        let (mut flow, _surface) = flow_with_surface();
        flow.prompt = PromptState::Submitting {
            record: sample_record(),
        };
        let view = flow.view().expect("view");
        assert!(!view.controls_enabled);
        assert_eq!(view.status.as_deref(), Some("Registrando..."));
    }

    #[test]
    fn cancel_closes_an_open_prompt() {
        let (mut flow, surface) = flow_with_surface();
        flow.prompt = PromptState::Open {
            record: sample_record(),
            status: None,
        };
        flow.cancel();
        assert_eq!(flow.state(), &PromptState::Closed);
        assert!(surface.prompt().is_none());
    }

    #[test]
    fn cancel_is_ignored_while_submitting() {
        let (mut flow, _surface) = flow_with_surface();
        flow.prompt = PromptState::Submitting {
            record: sample_record(),
        };
        flow.cancel();
        assert!(matches!(flow.prompt, PromptState::Submitting { .. }));
    }

    #[test]
    fn expired_confirmation_closes_on_the_next_poll() {
        let (mut flow, surface) = flow_with_surface();
        flow.prompt = PromptState::Confirmed {
            record: sample_record(),
            message: "Ponto registrado com sucesso!".to_string(),
            close_at: Instant::now() - Duration::from_millis(1),
        };
        // The unreachable client makes the follow-up fetch fail, which is
        // fine; the close must already have happened.
        let outcome = flow.poll_tick();
        assert_eq!(flow.state(), &PromptState::Closed);
        assert!(surface.prompt().is_none());
        assert_eq!(outcome, TickOutcome::SkippedSubmit);
    }

    #[test]
    fn submitting_prompt_skips_polling() {
        let (mut flow, _surface) = flow_with_surface();
        flow.prompt = PromptState::Submitting {
            record: sample_record(),
        };
        assert_eq!(flow.poll_tick(), TickOutcome::SkippedInactive);
    }

    #[test]
    fn confirm_from_closed_is_a_no_op() {
        let (mut flow, surface) = flow_with_surface();
        flow.confirm();
        assert_eq!(flow.state(), &PromptState::Closed);
        assert_eq!(surface.navigations().len(), 0);
    }
}
