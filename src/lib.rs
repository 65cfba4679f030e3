//! Attendance kiosk client library.
//!
//! This crate drives a kiosk screen against a face-recognition backend over
//! HTTP. It owns the capture side of the system: grabbing frames from a local
//! camera or a remote snapshot endpoint, submitting them for recognition,
//! surfacing the stability indicator, walking an operator through detection
//! confirmation and walking a new person through enrollment.
//!
//! # Invariants
//!
//! The flows enforce four invariants by construction:
//!
//! 1. **One In Flight**: at most one recognition submission is in flight per
//!    loop. A tick that lands while a cycle is still running is dropped,
//!    never queued.
//! 2. **Epoch Discard**: completions are applied only when they belong to
//!    the current session epoch. A reset bumps the epoch and everything
//!    older is silently discarded.
//! 3. **Data URI Payloads**: frame payloads cross the wire as base64 JPEG
//!    data URIs and nothing else. Capture and decode failures skip the
//!    cycle without user-visible errors.
//! 4. **Surface Boundary**: all user-facing state is pushed through
//!    [`display::DisplaySurface`]; the flows never touch a screen directly.
//!
//! # Module Structure
//!
//! - `config`: file + environment configuration for the kiosk daemon
//! - `frame`: camera frames, JPEG encoding and the data URI payload type
//! - `backend`: typed HTTP client for the recognition backend endpoints
//! - `source`: frame source adapters (local camera, remote snapshot)
//! - `cycle`: in-flight gating, pacing policies and loop thread plumbing
//! - `display`: the surface trait flows render into, plus a recorder
//! - `stability`: projection of backend stability hints into indicator state
//! - `recognize`, `confirm`, `enroll`, `roster`: the four kiosk activities

pub mod backend;
pub mod config;
pub mod confirm;
pub mod cycle;
pub mod display;
pub mod enroll;
pub mod frame;
pub mod recognize;
pub mod roster;
pub mod source;
pub mod stability;

pub use backend::{BackendClient, DetectionRecord};
pub use config::KioskConfig;
pub use confirm::ConfirmFlow;
pub use cycle::{CycleGate, CycleState, LoopHandle, Pacing, TickOutcome};
pub use display::{DisplaySurface, MemorySurface, SharedSurface};
pub use enroll::{EnrollmentFlow, EnrollmentSession};
pub use frame::FramePayload;
pub use recognize::RecognitionLoop;
pub use source::FrameSource;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

// -------------------- Session mode --------------------

/// Where frames come from for the lifetime of a kiosk session.
///
/// The mode is fixed at startup. Switching means tearing the session down
/// and starting a new one on the other landing path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    /// Frames are captured from a camera attached to the kiosk.
    Local,
    /// Frames are fetched from the backend's snapshot endpoint.
    Snapshot,
}

impl SessionMode {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(SessionMode::Local),
            "snapshot" => Ok(SessionMode::Snapshot),
            other => Err(anyhow::anyhow!(
                "unknown session mode '{}' (expected 'local' or 'snapshot')",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Local => "local",
            SessionMode::Snapshot => "snapshot",
        }
    }

    /// Path the kiosk navigates to after a finished enrollment.
    pub fn landing_path(&self) -> &'static str {
        match self {
            SessionMode::Local => "/",
            SessionMode::Snapshot => "/espcam",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Session epochs --------------------

/// Opaque marker for one generation of kiosk session state.
///
/// Loops snapshot the epoch when a cycle starts and compare it when the
/// cycle completes. A mismatch means a reset happened in between and the
/// completion must not touch the new session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionEpoch(u64);

/// Shared monotonic epoch counter. Cloning hands out another handle to the
/// same counter.
#[derive(Clone, Debug, Default)]
pub struct EpochCounter {
    counter: Arc<AtomicU64>,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SessionEpoch {
        SessionEpoch(self.counter.load(Ordering::SeqCst))
    }

    /// Invalidates every in-flight cycle and returns the new epoch.
    pub fn bump(&self) -> SessionEpoch {
        SessionEpoch(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

// -------------------- CPF handling --------------------

/// Strips everything but ASCII digits from a CPF as typed by an operator.
pub fn normalize_cpf(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Checks that a normalized CPF is exactly eleven digits.
///
/// Accepted: `52998224725`. Rejected: `529.982.247-25` (normalize first),
/// `1234`, empty input.
pub fn validate_cpf(cpf: &str) -> anyhow::Result<()> {
    // Compile once for hot paths.
    static CPF_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CPF_RE.get_or_init(|| regex::Regex::new(r"^[0-9]{11}$").unwrap());
    if re.is_match(cpf) {
        Ok(())
    } else {
        Err(anyhow::anyhow!("CPF inválido."))
    }
}
