//! Volunteer enrollment.
//!
//! Enrollment runs in two steps. Step one submits the volunteer's
//! identity and yields the backend's user id. Step two captures photos
//! against that id until the operator finalizes, which retrains the
//! recognition model and navigates back to the session's landing page.
//!
//! The enrollment flow is responsible for:
//! - Validating the identity form before it goes to the backend
//! - Holding the session state machine (steps, photo count, gating)
//! - Driving the preview loop while step two is active
//! - Enforcing the photo minimum before a finalize can run
//! - Tearing the whole session down on reset, including the camera
//!
//! The enrollment flow MUST NOT:
//! - Trust its local photo count over the backend's
//! - Leave a stale preview cycle's result on screen after a reset

use std::time::{Duration, Instant};

use crate::backend::{BackendClient, IdentityRequest, RegistrationFrameResponse};
use crate::config::TimerSettings;
use crate::cycle::{Completion, CycleGate, CycleStats, Pacing, TickOutcome};
use crate::display::{self, SharedSurface};
use crate::frame::FramePayload;
use crate::roster;
use crate::source::FrameSource;
use crate::{normalize_cpf, validate_cpf, EpochCounter, SessionEpoch, SessionMode};

/// Fewest photos a finalize will accept.
pub const MIN_PHOTOS: u32 = 5;
/// Counter calls this many "recommended".
pub const RECOMMENDED_PHOTOS: u32 = 10;
/// Counter calls this many "ideal".
pub const IDEAL_PHOTOS: u32 = 15;

/// Where an enrollment session is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Identity form.
    Step1,
    /// Photo capture.
    Step2,
    /// Retrain running; capture is over.
    Finalizing,
    /// Retrain done, waiting out the redirect pause.
    Redirecting,
}

/// Kind of a status line, for styling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
    Success,
}

/// One enrollment attempt. Reset replaces the whole value.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrollmentSession {
    pub step: Step,
    /// Backend user id from step one. Capture needs it.
    pub usuario_id: Option<i64>,
    /// Normalized CPF as the backend echoed it.
    pub cpf: Option<String>,
    pub photo_count: u32,
    /// In snapshot mode this stays false until the backend has processed
    /// a preview frame.
    pub capture_enabled: bool,
    pub epoch: SessionEpoch,
}

impl EnrollmentSession {
    pub fn start(epoch: SessionEpoch) -> Self {
        Self {
            step: Step::Step1,
            usuario_id: None,
            cpf: None,
            photo_count: 0,
            capture_enabled: false,
            epoch,
        }
    }
}

/// Raw identity form input, pre-validation.
#[derive(Clone, Debug, Default)]
pub struct IdentityForm {
    pub nome: String,
    pub cpf: String,
    pub matricula: String,
    pub email: String,
}

impl IdentityForm {
    /// Checks the required fields and the CPF, and normalizes the CPF to
    /// bare digits. Error messages are operator-readable.
    pub fn validate(&self) -> anyhow::Result<IdentityRequest> {
        let nome = self.nome.trim();
        let matricula = self.matricula.trim();
        if nome.is_empty() || self.cpf.trim().is_empty() || matricula.is_empty() {
            return Err(anyhow::anyhow!("Preencha nome, CPF e matrícula."));
        }
        let cpf = normalize_cpf(&self.cpf);
        validate_cpf(&cpf)?;
        Ok(IdentityRequest {
            nome: nome.to_string(),
            cpf,
            matricula: matricula.to_string(),
            email: self.email.trim().to_string(),
        })
    }
}

#[derive(Clone, Debug)]
struct StatusLine {
    text: String,
    kind: StatusKind,
    expires_at: Instant,
}

/// What the surface renders for the enrollment screen.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrollmentView {
    pub step: Step,
    pub form_visible: bool,
    pub capture_visible: bool,
    pub capture_enabled: bool,
    pub finalize_enabled: bool,
    pub counter_text: String,
    pub status: Option<(String, StatusKind)>,
    /// Full-screen overlay text while a retrain runs.
    pub training_overlay: Option<String>,
    pub stage_label: String,
}

/// Two-step enrollment state machine plus its preview loop.
pub struct EnrollmentFlow {
    client: BackendClient,
    surface: SharedSurface,
    epochs: EpochCounter,
    mode: SessionMode,
    session: EnrollmentSession,
    status: Option<StatusLine>,
    overlay: Option<String>,
    gate: CycleGate,
    source: Option<FrameSource>,
    redirect_delay: Duration,
    status_expiry: Duration,
}

impl EnrollmentFlow {
    pub fn new(
        client: BackendClient,
        surface: SharedSurface,
        epochs: EpochCounter,
        mode: SessionMode,
        source: Option<FrameSource>,
        timers: &TimerSettings,
    ) -> Self {
        let session = EnrollmentSession::start(epochs.current());
        Self {
            client,
            surface,
            epochs,
            mode,
            session,
            status: None,
            overlay: None,
            gate: CycleGate::new(),
            source,
            redirect_delay: timers.redirect_delay,
            status_expiry: timers.status_expiry,
        }
    }

    /// Connects the frame source and renders the initial screen.
    pub fn begin(&mut self) {
        if let Some(source) = &mut self.source {
            if let Err(err) = source.connect() {
                log::warn!("EnrollmentFlow: camera connect failed: {:#}", err);
            }
            if let Some(status) = source.camera_status() {
                display::lock(&self.surface).show_camera_status(&status);
            }
        }
        self.render();
    }

    /// Cadence for the preview loop in the given session mode.
    pub fn preview_pacing(mode: SessionMode, timers: &TimerSettings) -> Pacing {
        match mode {
            SessionMode::Local => Pacing::FixedInterval(timers.preview_interval),
            SessionMode::Snapshot => Pacing::DelayAfterCompletion {
                initial: timers.snapshot_initial_delay,
                delay: timers.preview_snapshot_redelay,
            },
        }
    }

    /// Step one: identity submission. Advances to step two when the
    /// backend accepts the volunteer.
    pub fn submit_identity(&mut self, form: &IdentityForm) {
        if self.session.step != Step::Step1 {
            return;
        }
        let request = match form.validate() {
            Ok(request) => request,
            Err(err) => {
                self.set_status(err.to_string(), StatusKind::Error);
                self.render();
                return;
            }
        };
        match self.client.user_status(&request) {
            Ok(response) if response.success => {
                self.session.usuario_id = response.usuario_id;
                self.session.cpf = Some(response.cpf.unwrap_or(request.cpf));
                self.session.step = Step::Step2;
                // A local camera previews immediately; snapshot capture
                // stays locked until a preview frame comes back processed.
                self.session.capture_enabled = self.mode == SessionMode::Local;
                if let Some(message) = response.message {
                    self.set_status(message, StatusKind::Success);
                }
            }
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Falha na verificação".to_string());
                self.set_status(message, StatusKind::Error);
            }
            Err(err) => {
                log::warn!("EnrollmentFlow: identity submit failed: {:#}", err);
                self.set_status(
                    "Erro na comunicação com o servidor".to_string(),
                    StatusKind::Error,
                );
            }
        }
        self.render();
    }

    /// One preview cycle. Only runs while step two is on screen.
    pub fn preview_tick(&mut self) -> TickOutcome {
        if self.session.step != Step::Step2 {
            return TickOutcome::SkippedInactive;
        }
        let Some(source) = &mut self.source else {
            return TickOutcome::SkippedInactive;
        };

        let epoch = self.epochs.current();
        if !self.gate.try_begin(epoch) {
            log::debug!("EnrollmentFlow: preview tick dropped, cycle in flight");
            return TickOutcome::DroppedBusy;
        }
        let payload = match source.acquire_frame() {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("EnrollmentFlow: preview capture failed: {:#}", err);
                self.gate.finish(self.epochs.current());
                return TickOutcome::SkippedCapture;
            }
        };
        let response = match self.client.process_registration_frame(&payload) {
            Ok(response) => response,
            Err(err) => {
                log::debug!("EnrollmentFlow: preview submit failed: {:#}", err);
                self.gate.finish(self.epochs.current());
                return TickOutcome::SkippedSubmit;
            }
        };
        if self.gate.finish(self.epochs.current()) == Completion::Stale {
            return TickOutcome::DiscardedStale;
        }
        self.apply_preview(response)
    }

    /// Applies a fresh preview reply. Unlike the recognition loop, the
    /// preview only paints frames the backend marked successful.
    fn apply_preview(&mut self, response: RegistrationFrameResponse) -> TickOutcome {
        if !response.success {
            return TickOutcome::Applied;
        }
        let Some(processed) = response.processed_frame else {
            return TickOutcome::Applied;
        };
        let payload = match FramePayload::from_data_uri(processed) {
            Ok(payload) => payload,
            Err(err) => {
                log::debug!("EnrollmentFlow: bad preview frame: {:#}", err);
                return TickOutcome::SkippedDecode;
            }
        };
        let source = self.source.as_ref();
        let display_box = source.and_then(|source| source.display_box());
        let (width, height) = match display_box {
            Some(fixed) => fixed,
            None => match payload.decode() {
                Ok(frame) => (frame.width(), frame.height()),
                Err(err) => {
                    log::debug!("EnrollmentFlow: undecodable preview frame: {:#}", err);
                    return TickOutcome::SkippedDecode;
                }
            },
        };
        {
            let mut surface = display::lock(&self.surface);
            surface.resize_overlay(width, height);
            surface.paint_processed_frame(&payload, width, height);
        }
        // First processed preview unlocks capture where it started locked.
        if !self.session.capture_enabled {
            self.session.capture_enabled = true;
            self.set_status(
                "Frame processado. Captura disponível.".to_string(),
                StatusKind::Success,
            );
            self.render();
        }
        TickOutcome::Applied
    }

    /// Step two: asks the backend to capture one photo for the enrolled
    /// user. The backend's count is authoritative.
    pub fn capture_photo(&mut self) {
        let Some(usuario_id) = self.session.usuario_id else {
            self.set_status("Primeiro conclua etapa 1.".to_string(), StatusKind::Error);
            self.render();
            return;
        };
        if self.session.step != Step::Step2 || !self.session.capture_enabled {
            return;
        }
        match self.client.capture_photo(usuario_id) {
            Ok(response) if response.success => {
                self.session.photo_count = response
                    .count
                    .unwrap_or_else(|| self.session.photo_count + 1);
                self.set_status("Foto salva com sucesso.".to_string(), StatusKind::Success);
                self.render();
                roster::refresh(&self.client, &self.surface);
                return;
            }
            Ok(response) => {
                let message = response
                    .message
                    .unwrap_or_else(|| "Erro ao capturar".to_string());
                self.set_status(message, StatusKind::Error);
            }
            Err(err) => {
                log::warn!("EnrollmentFlow: capture failed: {:#}", err);
                self.set_status(
                    "Erro de comunicação ao capturar".to_string(),
                    StatusKind::Error,
                );
            }
        }
        self.render();
    }

    /// Finalizes the enrollment: retrains the model, then navigates back
    /// to the session's landing page. Blocks until the retrain replies.
    pub fn finalize(&mut self) {
        if self.session.step != Step::Step2 {
            return;
        }
        if self.session.photo_count < MIN_PHOTOS {
            self.set_status(
                format!("Capture pelo menos {} fotos antes de finalizar.", MIN_PHOTOS),
                StatusKind::Error,
            );
            self.render();
            return;
        }

        self.session.step = Step::Finalizing;
        self.overlay = Some("Iniciando re-treinamento do modelo...".to_string());
        self.set_status(
            "Recriando modelo com novas imagens...".to_string(),
            StatusKind::Success,
        );
        self.render();

        let started = Instant::now();
        match self.client.retrain_model() {
            Ok(ack) if ack.success => {
                let elapsed = started.elapsed().as_secs_f64();
                self.overlay = Some(format!(
                    "Modelo atualizado em {:.1}s. Redirecionando...",
                    elapsed
                ));
                let message = ack
                    .message
                    .unwrap_or_else(|| "Modelo atualizado.".to_string());
                self.set_status(message, StatusKind::Success);
                self.render();
                std::thread::sleep(self.redirect_delay);
                self.session.step = Step::Redirecting;
                let landing = self.mode.landing_path();
                {
                    let mut surface = display::lock(&self.surface);
                    surface.navigate(landing);
                }
                self.render();
            }
            Ok(ack) => {
                self.session.step = Step::Step2;
                self.overlay = None;
                let message = ack
                    .message
                    .unwrap_or_else(|| "Falha ao atualizar modelo.".to_string());
                self.set_status(message, StatusKind::Error);
                self.render();
            }
            Err(err) => {
                log::warn!("EnrollmentFlow: retrain failed: {:#}", err);
                self.session.step = Step::Step2;
                self.overlay = None;
                self.set_status(
                    "Erro ao comunicar com servidor para treinar modelo.".to_string(),
                    StatusKind::Error,
                );
                self.render();
            }
        }
    }

    /// Tears the session down: releases the camera, invalidates every
    /// in-flight cycle and starts a fresh step-one session. The source
    /// stays attached; `begin` reopens it for the next enrollment.
    pub fn reset(&mut self) {
        if let Some(source) = &mut self.source {
            source.stop();
        }
        self.epochs.bump();
        self.session = EnrollmentSession::start(self.epochs.current());
        self.status = None;
        self.overlay = None;
        self.render();
    }

    /// Expires the status line. Runners call this on their cadence.
    pub fn service(&mut self, now: Instant) {
        let expired = self
            .status
            .as_ref()
            .is_some_and(|status| now >= status.expires_at);
        if expired {
            self.status = None;
            self.render();
        }
    }

    pub fn session(&self) -> &EnrollmentSession {
        &self.session
    }

    pub fn stats(&self) -> CycleStats {
        self.gate.stats()
    }

    /// Copy for the photo counter.
    pub fn counter_copy(count: u32) -> String {
        if count == 0 {
            return "Nenhuma foto capturada ainda.".to_string();
        }
        let mut text = format!("{} foto(s) capturada(s).", count);
        if count >= IDEAL_PHOTOS {
            text.push_str(" Quantidade ideal atingida.");
        } else if count >= RECOMMENDED_PHOTOS {
            text.push_str(" Mínimo recomendado atingido.");
        }
        text
    }

    /// Projects the flow into what the surface shows.
    pub fn view(&self) -> EnrollmentView {
        let step = self.session.step;
        let form_visible = step == Step::Step1;
        let stage_label = if form_visible {
            "Etapa 1 de 2 — Dados do voluntário"
        } else {
            "Etapa 2 de 2 — Captura de fotos"
        };
        EnrollmentView {
            step,
            form_visible,
            capture_visible: !form_visible,
            capture_enabled: step == Step::Step2 && self.session.capture_enabled,
            finalize_enabled: step == Step::Step2 && self.session.photo_count >= MIN_PHOTOS,
            counter_text: Self::counter_copy(self.session.photo_count),
            status: self
                .status
                .as_ref()
                .map(|status| (status.text.clone(), status.kind)),
            training_overlay: self.overlay.clone(),
            stage_label: stage_label.to_string(),
        }
    }

    fn set_status(&mut self, text: String, kind: StatusKind) {
        self.status = Some(StatusLine {
            text,
            kind,
            expires_at: Instant::now() + self.status_expiry,
        });
    }

    fn render(&self) {
        let view = self.view();
        display::lock(&self.surface).render_enrollment(&view);
    }
}
