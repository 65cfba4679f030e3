//! Frame acquisition.
//!
//! This module selects and drives the kiosk's frame source. A session
//! runs against exactly one source, chosen at construction from the
//! configured mode: a local camera (`camera`) or a network snapshot
//! endpoint (`snapshot`).
//!
//! Frame acquisition is responsible for:
//! - Building the right source for the session mode
//! - Producing submit-ready `FramePayload`s on demand
//! - Tracking the box processed frames should be displayed in
//! - Releasing the underlying device on teardown
//!
//! Frame acquisition MUST NOT:
//! - Talk to the recognition backend
//! - Pace capture; owning loops decide when to acquire

pub mod camera;
pub mod snapshot;

pub use camera::{CameraConfig, CameraStats, CameraStatus, CameraStream};
pub use snapshot::{SnapshotConfig, SnapshotSource, SnapshotStats};

use anyhow::{Context, Result};
use url::Url;

use crate::config::KioskConfig;
use crate::frame::FramePayload;
use crate::SessionMode;

/// One frame source per session, chosen by mode at construction.
pub struct FrameSource {
    backend: SourceBackend,
    viewport: Option<(u32, u32)>,
}

enum SourceBackend {
    Local {
        stream: CameraStream,
        jpeg_quality: u8,
    },
    Snapshot(SnapshotSource),
}

impl FrameSource {
    /// Builds the source the configured mode calls for.
    pub fn from_config(config: &KioskConfig) -> Result<Self> {
        match config.mode {
            SessionMode::Local => Self::local(
                CameraConfig {
                    device: config.camera.device.clone(),
                    width: config.camera.width,
                    height: config.camera.height,
                },
                config.jpeg_quality,
            ),
            SessionMode::Snapshot => {
                let base = Url::parse(&config.backend_url).context("parse backend url")?;
                let url = base
                    .join("/api/espcam/snapshot")
                    .context("build snapshot url")?;
                Self::snapshot(SnapshotConfig {
                    url: url.to_string(),
                    timeout: config.http_timeout,
                })
            }
        }
    }

    pub fn local(camera: CameraConfig, jpeg_quality: u8) -> Result<Self> {
        Ok(Self {
            backend: SourceBackend::Local {
                stream: CameraStream::new(camera)?,
                jpeg_quality,
            },
            viewport: None,
        })
    }

    pub fn snapshot(config: SnapshotConfig) -> Result<Self> {
        Ok(Self {
            backend: SourceBackend::Snapshot(SnapshotSource::new(config)?),
            viewport: None,
        })
    }

    pub fn mode(&self) -> SessionMode {
        match &self.backend {
            SourceBackend::Local { .. } => SessionMode::Local,
            SourceBackend::Snapshot(_) => SessionMode::Snapshot,
        }
    }

    /// Opens the underlying device. A no-op for snapshot sources, which
    /// connect per fetch.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Local { stream, .. } => stream.connect(),
            SourceBackend::Snapshot(_) => Ok(()),
        }
    }

    /// Captures one frame and returns it ready to submit.
    pub fn acquire_frame(&mut self) -> Result<FramePayload> {
        match &mut self.backend {
            SourceBackend::Local {
                stream,
                jpeg_quality,
            } => {
                let frame = stream.capture_frame()?;
                let jpeg = frame.to_jpeg(*jpeg_quality)?;
                FramePayload::from_jpeg_bytes(&jpeg)
            }
            SourceBackend::Snapshot(source) => source.fetch(),
        }
    }

    /// Records the box the surface currently shows frames in. Overrides
    /// the source's intrinsic size until called again.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = Some((width, height));
    }

    /// The box processed frames should be painted into, if known.
    pub fn display_box(&self) -> Option<(u32, u32)> {
        if self.viewport.is_some() {
            return self.viewport;
        }
        match &self.backend {
            SourceBackend::Local { stream, .. } => stream.dimensions(),
            SourceBackend::Snapshot(_) => None,
        }
    }

    /// Camera lifecycle, for sources that have one.
    pub fn camera_status(&self) -> Option<CameraStatus> {
        match &self.backend {
            SourceBackend::Local { stream, .. } => Some(stream.status()),
            SourceBackend::Snapshot(_) => None,
        }
    }

    /// Releases the underlying device. Local captures fail until `connect`
    /// reopens it.
    pub fn stop(&mut self) {
        match &mut self.backend {
            SourceBackend::Local { stream, .. } => stream.stop(),
            SourceBackend::Snapshot(_) => {}
        }
    }

    /// One line for health logs.
    pub fn describe(&self) -> String {
        match &self.backend {
            SourceBackend::Local { stream, .. } => {
                let stats = stream.stats();
                format!("camera {} ({} frames)", stats.device, stats.frames_captured)
            }
            SourceBackend::Snapshot(source) => {
                let stats = source.stats();
                format!("snapshot {} ({} fetches)", stats.source, stats.fetches)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KioskConfig;
    use crate::frame::DATA_URI_PREFIX;

    fn stub_config(mode: SessionMode) -> KioskConfig {
        let mut config = KioskConfig::default();
        config.mode = mode;
        config.camera.device = "stub://test".to_string();
        config.camera.width = 32;
        config.camera.height = 24;
        config
    }

    #[test]
    fn local_source_yields_data_uri_payloads() -> Result<()> {
        let mut source = FrameSource::from_config(&stub_config(SessionMode::Local))?;
        assert_eq!(source.mode(), SessionMode::Local);
        source.connect()?;
        let payload = source.acquire_frame()?;
        assert!(payload.as_str().starts_with(DATA_URI_PREFIX));
        Ok(())
    }

    #[test]
    fn viewport_overrides_intrinsic_size() -> Result<()> {
        let mut source = FrameSource::from_config(&stub_config(SessionMode::Local))?;
        source.connect()?;
        assert_eq!(source.display_box(), Some((32, 24)));
        source.set_viewport(800, 600);
        assert_eq!(source.display_box(), Some((800, 600)));
        Ok(())
    }

    #[test]
    fn snapshot_source_has_no_camera_lifecycle() -> Result<()> {
        let source = FrameSource::from_config(&stub_config(SessionMode::Snapshot))?;
        assert_eq!(source.mode(), SessionMode::Snapshot);
        assert!(source.camera_status().is_none());
        assert!(source.display_box().is_none());
        Ok(())
    }

    #[test]
    fn stopped_local_source_fails_until_reconnected() -> Result<()> {
        let mut source = FrameSource::from_config(&stub_config(SessionMode::Local))?;
        source.connect()?;
        source.stop();
        assert!(source.acquire_frame().is_err());
        assert_eq!(source.camera_status(), Some(CameraStatus::Released));

        source.connect()?;
        assert!(source.acquire_frame().is_ok());
        assert_eq!(source.display_box(), Some((32, 24)));
        Ok(())
    }
}
