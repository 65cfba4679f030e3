//! Local camera stream.
//!
//! Provides `CameraStream` for capturing frames from a kiosk-attached
//! camera.
//!
//! The camera stream is responsible for:
//! - Opening a device node (e.g., /dev/video0) or a `stub://` synthetic
//! - Producing RGB `CameraFrame`s on demand
//! - Reporting its lifecycle (connecting, ready, failed, released)
//! - Releasing the device when a session is torn down
//!
//! The camera stream MUST NOT:
//! - Pace itself; the owning loop decides when to capture
//! - Encode or upload frames

use anyhow::{anyhow, Result};

use crate::frame::CameraFrame;

/// Mapped buffers per device stream. Two keep the queue shallow so a
/// capture always returns a recent frame.
#[cfg(feature = "camera-v4l2")]
const MMAP_BUFFERS: u32 = 2;

/// Configuration for a camera stream.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://` for a synthetic feed.
    pub device: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// Where the camera is in its lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraStatus {
    /// Opened but not yet delivering frames.
    Connecting,
    /// Delivering frames at the negotiated size.
    Ready { width: u32, height: u32 },
    /// Failed; the message is user-displayable.
    Error { message: String },
    /// Stopped by a session teardown. Capturing again requires a reconnect.
    Released,
}

/// Counters for health logging.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera stream with a synthetic fallback for `stub://` devices.
pub struct CameraStream {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(DeviceCamera),
}

impl CameraStream {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)?),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(anyhow!(
                "device '{}' needs the camera-v4l2 feature (stub:// works without it)",
                config.device
            ))
        }
    }

    /// Opens the device and negotiates the capture format.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.connect(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.connect(),
        }
    }

    /// Grabs one frame. Fails until the stream is connected and producing.
    pub fn capture_frame(&mut self) -> Result<CameraFrame> {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.capture_frame(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.capture_frame(),
        }
    }

    pub fn status(&self) -> CameraStatus {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.status(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.status(),
        }
    }

    /// Frame size while the stream is `Ready`.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self.status() {
            CameraStatus::Ready { width, height } => Some((width, height)),
            _ => None,
        }
    }

    /// Releases the device. Further captures fail until `connect` reopens
    /// the stream.
    pub fn stop(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(camera) => camera.stop(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.stop(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(camera) => camera.stats(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(camera) => camera.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    ticks: u64,
    connected: bool,
    stopped: bool,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            ticks: 0,
            connected: false,
            stopped: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.stopped = false;
        self.connected = true;
        log::info!(
            "CameraStream: connected to {} (synthetic)",
            self.config.device
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CameraFrame> {
        if self.stopped {
            return Err(anyhow!("camera stream was released"));
        }
        if !self.connected {
            return Err(anyhow!("camera stream not connected"));
        }
        self.ticks += 1;
        let pixels = self.generate_pixels();
        CameraFrame::from_rgb(pixels, self.config.width, self.config.height)
    }

    /// A gradient with a sweeping vertical bar, so consecutive frames have
    /// distinct content.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width;
        let height = self.config.height;
        let sweep = (self.ticks % u64::from(width.max(1))) as u32;
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                if x == sweep {
                    pixels.push(255);
                    pixels.push(255);
                } else {
                    pixels.push((x % 256) as u8);
                    pixels.push((y % 256) as u8);
                }
                pixels.push(((x + y) % 256) as u8);
            }
        }
        pixels
    }

    fn status(&self) -> CameraStatus {
        if self.stopped {
            CameraStatus::Released
        } else if self.connected {
            CameraStatus::Ready {
                width: self.config.width,
                height: self.config.height,
            }
        } else {
            CameraStatus::Connecting
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.connected = false;
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.ticks,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Real device via V4L2
// ----------------------------------------------------------------------------

#[cfg(feature = "camera-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceCameraState>,
    frames_read: u64,
    fault: Option<String>,
    stopped: bool,
    // Dimensions the driver actually granted, which may differ from the
    // requested ones.
    granted: (u32, u32),
}

#[cfg(feature = "camera-v4l2")]
#[ouroboros::self_referencing]
struct DeviceCameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "camera-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Result<Self> {
        Ok(Self {
            granted: (config.width, config.height),
            config,
            state: None,
            frames_read: 0,
            fault: None,
            stopped: false,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use anyhow::Context;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut node = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera device {}", self.config.device))?;
        let mut wanted = node.format().context("read camera format")?;
        wanted.width = self.config.width;
        wanted.height = self.config.height;
        wanted.fourcc = v4l::FourCC::new(b"RGB3");

        // Drivers may refuse the requested format; fall back to whatever
        // they negotiated and report that instead.
        let granted = match node.set_format(&wanted) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraStream: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                node.format()
                    .context("read camera format after set failure")?
            }
        };
        self.granted = (granted.width, granted.height);
        self.fault = None;

        let state = DeviceCameraStateTryBuilder {
            device: node,
            stream_builder: |node| {
                v4l::prelude::MmapStream::with_buffers(node, Type::VideoCapture, MMAP_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create camera buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.fault = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.stopped = false;

        log::info!(
            "CameraStream: connected to {} ({}x{})",
            self.config.device,
            self.granted.0,
            self.granted.1
        );
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CameraFrame> {
        use anyhow::Context;
        use v4l::io::traits::CaptureStream;

        if self.stopped {
            return Err(anyhow!("camera stream was released"));
        }
        let state = self.state.as_mut().context("camera device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| {
                self.fault = Some(err.to_string());
                anyhow::Error::new(err).context("capture camera frame")
            })?;

        let (width, height) = self.granted;
        let expected = (width as usize) * (height as usize) * 3;
        if buf.len() < expected {
            let message = format!(
                "camera delivered {} bytes, expected at least {}",
                buf.len(),
                expected
            );
            self.fault = Some(message.clone());
            return Err(anyhow!(message));
        }

        self.frames_read += 1;
        CameraFrame::from_rgb(buf[..expected].to_vec(), width, height)
    }

    fn status(&self) -> CameraStatus {
        if self.stopped {
            return CameraStatus::Released;
        }
        if let Some(message) = &self.fault {
            return CameraStatus::Error {
                message: message.clone(),
            };
        }
        if self.state.is_some() {
            CameraStatus::Ready {
                width: self.granted.0,
                height: self.granted.1,
            }
        } else {
            CameraStatus::Connecting
        }
    }

    fn stop(&mut self) {
        // Dropping the state closes the device node.
        self.state = None;
        self.stopped = true;
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frames_read,
            device: self.config.device.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
        }
    }

    #[test]
    fn synthetic_camera_produces_frames() -> Result<()> {
        let mut stream = CameraStream::new(stub_config())?;
        assert_eq!(stream.status(), CameraStatus::Connecting);
        stream.connect()?;
        assert_eq!(
            stream.status(),
            CameraStatus::Ready {
                width: 64,
                height: 48
            }
        );

        let frame = stream.capture_frame()?;
        assert_eq!(frame.width(), 64);
        assert_eq!(frame.height(), 48);
        assert_eq!(stream.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut stream = CameraStream::new(stub_config())?;
        stream.connect()?;
        let first = stream.capture_frame()?;
        let second = stream.capture_frame()?;
        assert_ne!(first.pixels(), second.pixels());
        Ok(())
    }

    #[test]
    fn capture_requires_connect() -> Result<()> {
        let mut stream = CameraStream::new(stub_config())?;
        assert!(stream.capture_frame().is_err());
        Ok(())
    }

    #[test]
    fn stop_releases_the_stream() -> Result<()> {
        let mut stream = CameraStream::new(stub_config())?;
        stream.connect()?;
        stream.capture_frame()?;
        stream.stop();
        assert_eq!(stream.status(), CameraStatus::Released);
        assert!(stream.capture_frame().is_err());
        Ok(())
    }

    #[test]
    fn released_stream_reconnects() -> Result<()> {
        let mut stream = CameraStream::new(stub_config())?;
        stream.connect()?;
        stream.capture_frame()?;
        stream.stop();
        assert!(stream.capture_frame().is_err());

        stream.connect()?;
        assert_eq!(
            stream.status(),
            CameraStatus::Ready {
                width: 64,
                height: 48
            }
        );
        let frame = stream.capture_frame()?;
        assert_eq!(frame.width(), 64);
        assert_eq!(stream.stats().frames_captured, 2);
        Ok(())
    }
}
