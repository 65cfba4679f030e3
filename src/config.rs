use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::SessionMode;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_MODE: SessionMode = SessionMode::Local;
const DEFAULT_CAMERA_DEVICE: &str = "stub://kiosk";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_RECOGNITION_INTERVAL_MS: u64 = 100;
const DEFAULT_SNAPSHOT_INITIAL_DELAY_MS: u64 = 400;
const DEFAULT_SNAPSHOT_REDELAY_MS: u64 = 200;
const DEFAULT_DETECTION_POLL_MS: u64 = 1200;
const DEFAULT_PREVIEW_INTERVAL_MS: u64 = 150;
const DEFAULT_PREVIEW_SNAPSHOT_REDELAY_MS: u64 = 250;
const DEFAULT_CONFIRM_AUTOCLOSE_MS: u64 = 1000;
const DEFAULT_REDIRECT_DELAY_MS: u64 = 1300;
const DEFAULT_STATUS_EXPIRY_MS: u64 = 6000;

#[derive(Debug, Deserialize, Default)]
struct KioskConfigFile {
    backend_url: Option<String>,
    mode: Option<String>,
    http_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    camera: Option<CameraConfigFile>,
    timers: Option<TimerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimerConfigFile {
    recognition_interval_ms: Option<u64>,
    snapshot_initial_delay_ms: Option<u64>,
    snapshot_redelay_ms: Option<u64>,
    detection_poll_ms: Option<u64>,
    preview_interval_ms: Option<u64>,
    preview_snapshot_redelay_ms: Option<u64>,
    confirm_autoclose_ms: Option<u64>,
    redirect_delay_ms: Option<u64>,
    status_expiry_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct KioskConfig {
    pub backend_url: String,
    pub mode: SessionMode,
    /// Per-request HTTP timeout. `None` leaves requests unbounded.
    pub http_timeout: Option<Duration>,
    pub jpeg_quality: u8,
    pub camera: CameraSettings,
    pub timers: TimerSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct TimerSettings {
    /// Cadence of the recognition loop when frames are captured locally.
    pub recognition_interval: Duration,
    /// Wait before the first snapshot-mode recognition cycle.
    pub snapshot_initial_delay: Duration,
    /// Wait after a snapshot-mode cycle completes before the next starts.
    pub snapshot_redelay: Duration,
    /// Cadence of the pending-detection poller.
    pub detection_poll: Duration,
    /// Cadence of the enrollment preview loop with a local camera.
    pub preview_interval: Duration,
    /// Wait between snapshot-mode enrollment preview cycles.
    pub preview_snapshot_redelay: Duration,
    /// How long a confirmed prompt stays up before closing itself.
    pub confirm_autoclose: Duration,
    /// Pause between a finished retrain and the landing-page navigation.
    pub redirect_delay: Duration,
    /// How long enrollment status messages stay on screen.
    pub status_expiry: Duration,
}

/// Command-line values that win over both the config file and the
/// environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub mode: Option<String>,
    pub backend_url: Option<String>,
    pub camera_device: Option<String>,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            mode: DEFAULT_MODE,
            http_timeout: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            camera: CameraSettings::default(),
            timers: TimerSettings::default(),
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
        }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            recognition_interval: Duration::from_millis(DEFAULT_RECOGNITION_INTERVAL_MS),
            snapshot_initial_delay: Duration::from_millis(DEFAULT_SNAPSHOT_INITIAL_DELAY_MS),
            snapshot_redelay: Duration::from_millis(DEFAULT_SNAPSHOT_REDELAY_MS),
            detection_poll: Duration::from_millis(DEFAULT_DETECTION_POLL_MS),
            preview_interval: Duration::from_millis(DEFAULT_PREVIEW_INTERVAL_MS),
            preview_snapshot_redelay: Duration::from_millis(DEFAULT_PREVIEW_SNAPSHOT_REDELAY_MS),
            confirm_autoclose: Duration::from_millis(DEFAULT_CONFIRM_AUTOCLOSE_MS),
            redirect_delay: Duration::from_millis(DEFAULT_REDIRECT_DELAY_MS),
            status_expiry: Duration::from_millis(DEFAULT_STATUS_EXPIRY_MS),
        }
    }
}

impl KioskConfig {
    /// Loads configuration the way the daemon does: optional JSON file named
    /// by `KIOSK_CONFIG`, then environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("KIOSK_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies command-line overrides on top of a loaded config and
    /// re-validates the result.
    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(mode) = overrides.mode.as_deref() {
            self.mode = SessionMode::parse(mode)?;
        }
        if let Some(url) = overrides.backend_url.as_deref() {
            self.backend_url = url.to_string();
        }
        if let Some(device) = overrides.camera_device.as_deref() {
            self.camera.device = device.to_string();
        }
        self.validate()
    }

    fn from_file(file: KioskConfigFile) -> Result<Self> {
        let backend_url = file
            .backend_url
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let mode = match file.mode.as_deref() {
            Some(mode) => SessionMode::parse(mode)?,
            None => DEFAULT_MODE,
        };
        let http_timeout = file
            .http_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        let jpeg_quality = file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        let camera = CameraSettings {
            device: file
                .camera
                .as_ref()
                .and_then(|camera| camera.device.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };
        let timers = file.timers.unwrap_or_default();
        let timers = TimerSettings {
            recognition_interval: duration_ms(
                timers.recognition_interval_ms,
                DEFAULT_RECOGNITION_INTERVAL_MS,
            ),
            snapshot_initial_delay: duration_ms(
                timers.snapshot_initial_delay_ms,
                DEFAULT_SNAPSHOT_INITIAL_DELAY_MS,
            ),
            snapshot_redelay: duration_ms(timers.snapshot_redelay_ms, DEFAULT_SNAPSHOT_REDELAY_MS),
            detection_poll: duration_ms(timers.detection_poll_ms, DEFAULT_DETECTION_POLL_MS),
            preview_interval: duration_ms(timers.preview_interval_ms, DEFAULT_PREVIEW_INTERVAL_MS),
            preview_snapshot_redelay: duration_ms(
                timers.preview_snapshot_redelay_ms,
                DEFAULT_PREVIEW_SNAPSHOT_REDELAY_MS,
            ),
            confirm_autoclose: duration_ms(
                timers.confirm_autoclose_ms,
                DEFAULT_CONFIRM_AUTOCLOSE_MS,
            ),
            redirect_delay: duration_ms(timers.redirect_delay_ms, DEFAULT_REDIRECT_DELAY_MS),
            status_expiry: duration_ms(timers.status_expiry_ms, DEFAULT_STATUS_EXPIRY_MS),
        };
        Ok(Self {
            backend_url,
            mode,
            http_timeout,
            jpeg_quality,
            camera,
            timers,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("KIOSK_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.backend_url = url;
            }
        }
        if let Ok(mode) = std::env::var("KIOSK_MODE") {
            if !mode.trim().is_empty() {
                self.mode = SessionMode::parse(&mode)?;
            }
        }
        if let Ok(device) = std::env::var("KIOSK_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(timeout) = std::env::var("KIOSK_HTTP_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                anyhow!("KIOSK_HTTP_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.http_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let url = url::Url::parse(&self.backend_url)
            .map_err(|e| anyhow!("invalid backend url '{}': {}", self.backend_url, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!(
                "backend url must use http or https, got '{}'",
                url.scheme()
            ));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("jpeg_quality must be between 1 and 100"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        let cadences = [
            ("recognition_interval_ms", self.timers.recognition_interval),
            ("snapshot_redelay_ms", self.timers.snapshot_redelay),
            ("detection_poll_ms", self.timers.detection_poll),
            ("preview_interval_ms", self.timers.preview_interval),
            (
                "preview_snapshot_redelay_ms",
                self.timers.preview_snapshot_redelay,
            ),
        ];
        for (name, value) in cadences {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<KioskConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn duration_ms(value: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default_ms))
}
