//! HTTP client for the recognition backend.
//!
//! Every kiosk activity talks to the backend through this module:
//!
//! - frame submission for recognition and for enrollment preview
//! - the pending-detection probe and attendance confirmation
//! - enrollment identity, photo capture and model retraining
//! - roster and monitoring reads
//!
//! The client is deliberately thin. It moves JSON and reports transport
//! facts; what a reply *means* for a flow (which message to show, which
//! state to enter) stays in the flow modules. Field names below are the
//! backend's wire contract and must not be renamed.

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::frame::FramePayload;
use crate::stability::StabilityPayload;

/// Typed HTTP client bound to one backend base URL.
#[derive(Clone, Debug)]
pub struct BackendClient {
    base: Url,
    timeout: Option<Duration>,
}

/// Raw HTTP outcome. Non-2xx statuses are replies, not errors; only
/// transport-level failures surface as `Err` from the client.
#[derive(Clone, Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ----------------------------------------------------------------------------
// Request and response shapes
// ----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct FrameRequest<'a> {
    frame: &'a str,
}

/// Reply to a recognition frame submission.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProcessFrameResponse {
    #[serde(default)]
    pub success: bool,
    /// Annotated frame as a JPEG data URI, when the backend produced one.
    #[serde(default)]
    pub processed_frame: Option<String>,
    /// Stability hints for the on-screen indicator.
    #[serde(default)]
    pub ui: Option<StabilityPayload>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply to an enrollment preview frame submission.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RegistrationFrameResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub processed_frame: Option<String>,
    /// Face count the backend saw in this frame.
    #[serde(default)]
    pub faces_detected: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One pending detection as returned by the probe endpoint.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DetectionRecord {
    pub cpf: String,
    pub nome: String,
    pub matricula: String,
    /// Detection timestamp, passed through as the backend formatted it.
    pub horario: String,
    pub confidence: Option<f64>,
    /// Opaque handle the confirmation must echo back.
    pub detection_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct LastDetectionWire {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    cpf: Option<String>,
    #[serde(default)]
    nome: Option<String>,
    #[serde(default)]
    matricula: Option<String>,
    #[serde(default)]
    horario: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    detection_id: Option<String>,
}

impl LastDetectionWire {
    fn into_record(self) -> Result<Option<DetectionRecord>> {
        if !self.found {
            return Ok(None);
        }
        let record = DetectionRecord {
            cpf: self.cpf.ok_or_else(|| anyhow!("detection without cpf"))?,
            nome: self.nome.ok_or_else(|| anyhow!("detection without nome"))?,
            matricula: self
                .matricula
                .ok_or_else(|| anyhow!("detection without matricula"))?,
            horario: self
                .horario
                .ok_or_else(|| anyhow!("detection without horario"))?,
            confidence: self.confidence,
            detection_id: self
                .detection_id
                .ok_or_else(|| anyhow!("detection without detection_id"))?,
        };
        Ok(Some(record))
    }
}

/// Body of an attendance confirmation.
#[derive(Debug, Serialize)]
pub struct ConfirmRequest {
    pub cpf: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub detection_id: String,
}

/// Step-one enrollment identity as sent to the backend. CPF must already be
/// normalized to bare digits.
#[derive(Debug, Serialize)]
pub struct IdentityRequest {
    pub nome: String,
    pub cpf: String,
    pub matricula: String,
    pub email: String,
}

/// Reply to the identity check. `new_user` tells whether the backend created
/// the record or found an existing one.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UserStatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub new_user: bool,
    #[serde(default)]
    pub usuario_id: Option<i64>,
    #[serde(default)]
    pub cpf: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
struct CapturePhotoRequest {
    usuario_id: i64,
}

/// Reply to a photo capture. `count` is the authoritative total for the
/// person being enrolled.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CaptureResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Generic success/message reply.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// One registered person in the roster.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RosterEntry {
    pub nome: String,
    pub cpf: String,
    pub matricula: String,
    /// Photos on file for this person.
    #[serde(default)]
    pub imagens: u32,
}

/// One attendance mark from today.
#[derive(Clone, Debug, Deserialize)]
pub struct AttendanceEntry {
    pub nome: String,
    pub hora: String,
    #[serde(default)]
    pub confianca: Option<f64>,
}

/// The most recent confirmed recognition, if any.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LastRecognition {
    #[serde(default)]
    pub nome: Option<String>,
    #[serde(default)]
    pub horario: Option<String>,
    #[serde(default)]
    pub confianca: Option<f64>,
}

/// Trained-model summary used for monitoring.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ModelStatus {
    #[serde(default)]
    pub trained: bool,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DatasetEntry {
    pub cpf: String,
    #[serde(default)]
    pub imagens: u32,
}

#[derive(Debug, Serialize)]
struct ThresholdRequest {
    threshold: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ThresholdResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub threshold: f64,
}

#[derive(Debug, Serialize)]
struct TimingsRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    stable_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cooldown_seconds: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TimingsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub stable_seconds: f64,
    #[serde(default)]
    pub cooldown_seconds: f64,
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

impl BackendClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("invalid backend url '{}'", base_url))?;
        Ok(Self { base, timeout })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Submits a frame for recognition. The reply body is parsed no matter
    /// the status code; the backend reports its own failures in-band.
    pub fn process_frame(&self, frame: &FramePayload) -> Result<ProcessFrameResponse> {
        let reply = self.post_json(
            "/api/process_frame",
            &FrameRequest {
                frame: frame.as_str(),
            },
        )?;
        parse_reply(&reply, "process_frame")
    }

    /// Submits a frame for enrollment preview annotation.
    pub fn process_registration_frame(
        &self,
        frame: &FramePayload,
    ) -> Result<RegistrationFrameResponse> {
        let reply = self.post_json(
            "/api/process_frame_registro",
            &FrameRequest {
                frame: frame.as_str(),
            },
        )?;
        parse_reply(&reply, "process_frame_registro")
    }

    /// Probes for a pending detection. `Ok(None)` means nothing is waiting.
    pub fn last_detection(&self) -> Result<Option<DetectionRecord>> {
        let reply = self.get("/api/last_detection")?;
        let wire: LastDetectionWire = parse_reply(&reply, "last_detection")?;
        wire.into_record()
    }

    /// Sends an attendance confirmation. Returns the raw reply because the
    /// confirmation flow distinguishes status, body and parse failures.
    pub fn confirm_attendance(&self, request: &ConfirmRequest) -> Result<HttpReply> {
        self.post_json("/api/confirmar_ponto", request)
    }

    /// Verifies or creates the person being enrolled.
    pub fn user_status(&self, request: &IdentityRequest) -> Result<UserStatusResponse> {
        let reply = self.post_json("/api/usuario_status", request)?;
        parse_reply(&reply, "usuario_status")
    }

    /// Asks the backend to capture a photo from its cached enrollment frame.
    pub fn capture_photo(&self, usuario_id: i64) -> Result<CaptureResponse> {
        let reply = self.post_json("/api/capturar_foto", &CapturePhotoRequest { usuario_id })?;
        parse_reply(&reply, "capturar_foto")
    }

    /// Kicks off a model retrain. Blocks until the backend answers.
    pub fn retrain_model(&self) -> Result<AckResponse> {
        let reply = self.post_empty("/api/recriar_modelo")?;
        parse_reply(&reply, "recriar_modelo")
    }

    pub fn registered_people(&self) -> Result<Vec<RosterEntry>> {
        let reply = self.get("/api/pessoas_registradas")?;
        parse_reply(&reply, "pessoas_registradas")
    }

    pub fn today_attendance(&self) -> Result<Vec<AttendanceEntry>> {
        let reply = self.get("/api/pontos_hoje")?;
        parse_reply(&reply, "pontos_hoje")
    }

    pub fn last_recognition(&self) -> Result<LastRecognition> {
        let reply = self.get("/api/last_recognition")?;
        parse_reply(&reply, "last_recognition")
    }

    pub fn model_status(&self) -> Result<ModelStatus> {
        let reply = self.get("/api/model_status")?;
        parse_reply(&reply, "model_status")
    }

    /// Adjusts the recognizer's confidence threshold.
    pub fn set_threshold(&self, threshold: f64) -> Result<ThresholdResponse> {
        let reply = self.post_json("/api/ajustar_limite", &ThresholdRequest { threshold })?;
        parse_reply(&reply, "ajustar_limite")
    }

    /// Adjusts the stability and cooldown windows. `None` leaves a value
    /// unchanged server-side.
    pub fn set_timings(
        &self,
        stable_seconds: Option<f64>,
        cooldown_seconds: Option<f64>,
    ) -> Result<TimingsResponse> {
        let reply = self.post_json(
            "/api/ajustar_tempos",
            &TimingsRequest {
                stable_seconds,
                cooldown_seconds,
            },
        )?;
        parse_reply(&reply, "ajustar_tempos")
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("build url for {}", path))
    }

    fn get(&self, path: &str) -> Result<HttpReply> {
        let url = self.endpoint(path)?;
        let mut request = ureq::get(url.as_str());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        finish(request.call(), path)
    }

    fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<HttpReply> {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_string(body)
            .with_context(|| format!("serialize request body for {}", path))?;
        let mut request = ureq::post(url.as_str()).set("Content-Type", "application/json");
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        finish(request.send_string(&payload), path)
    }

    fn post_empty(&self, path: &str) -> Result<HttpReply> {
        let url = self.endpoint(path)?;
        let mut request = ureq::post(url.as_str());
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        finish(request.call(), path)
    }
}

fn finish(
    result: std::result::Result<ureq::Response, ureq::Error>,
    path: &str,
) -> Result<HttpReply> {
    match result {
        Ok(response) => {
            let status = response.status();
            let body = response
                .into_string()
                .with_context(|| format!("read response body from {}", path))?;
            Ok(HttpReply { status, body })
        }
        Err(ureq::Error::Status(status, response)) => {
            let body = response.into_string().unwrap_or_default();
            Ok(HttpReply { status, body })
        }
        Err(err) => Err(err).with_context(|| format!("request to {} failed", path)),
    }
}

fn parse_reply<T: DeserializeOwned>(reply: &HttpReply, what: &str) -> Result<T> {
    serde_json::from_str(&reply.body).map_err(|e| anyhow!("parse {} response: {}", what, e))
}
