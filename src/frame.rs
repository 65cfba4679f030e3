//! Frame payloads and JPEG handling.
//!
//! Everything the kiosk sends to or receives from the recognition backend is
//! a base64 JPEG data URI. This module owns that payload type plus the
//! conversions around it:
//!
//! - `CameraFrame`: raw RGB pixels as produced by a frame source.
//! - `FramePayload`: a validated `data:image/jpeg;base64,` string.
//! - JPEG encoding (capture side) and decoding (paint side).
//!
//! The conversions MUST NOT:
//! - Accept payloads without the JPEG data URI prefix
//! - Grow beyond the backend's upload cap

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::GenericImageView;

/// Prefix every frame payload carries on the wire.
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Upper bound on an encoded payload, matching the backend's upload cap.
pub const MAX_PAYLOAD_BYTES: usize = 5 * 1024 * 1024;

// ----------------------------------------------------------------------------
// CameraFrame: raw pixels from a source
// ----------------------------------------------------------------------------

/// One uncompressed RGB frame.
#[derive(Clone, Debug)]
pub struct CameraFrame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl CameraFrame {
    /// Wraps raw RGB8 pixel data. The buffer length must be
    /// `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize) * (height as usize) * 3;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "rgb buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Encodes the frame as JPEG at the given quality (1-100).
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality);
        encoder
            .encode(
                &self.data,
                self.width,
                self.height,
                image::ExtendedColorType::Rgb8,
            )
            .with_context(|| format!("encode {}x{} frame as jpeg", self.width, self.height))?;
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// FramePayload: the wire format
// ----------------------------------------------------------------------------

/// A frame as it crosses the wire: `data:image/jpeg;base64,<payload>`.
///
/// Construction validates the prefix, so holding a `FramePayload` means the
/// string is at least shaped like a frame. Decoding still has to prove the
/// bytes are a real image before anything is painted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePayload(String);

impl FramePayload {
    /// Wraps already-encoded JPEG bytes into a data URI.
    pub fn from_jpeg_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(anyhow!("refusing to encode an empty jpeg"));
        }
        if bytes.len() > MAX_PAYLOAD_BYTES {
            return Err(anyhow!(
                "jpeg is {} bytes, over the {} byte payload cap",
                bytes.len(),
                MAX_PAYLOAD_BYTES
            ));
        }
        let mut uri = String::with_capacity(DATA_URI_PREFIX.len() + bytes.len() * 4 / 3 + 4);
        uri.push_str(DATA_URI_PREFIX);
        BASE64.encode_string(bytes, &mut uri);
        Ok(Self(uri))
    }

    /// Accepts a data URI received from the backend.
    pub fn from_data_uri(uri: String) -> Result<Self> {
        if !uri.starts_with(DATA_URI_PREFIX) {
            return Err(anyhow!("frame payload is not a jpeg data uri"));
        }
        if uri.len() == DATA_URI_PREFIX.len() {
            return Err(anyhow!("frame payload has no image data"));
        }
        Ok(Self(uri))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recovers the raw JPEG bytes behind the prefix.
    pub fn jpeg_bytes(&self) -> Result<Vec<u8>> {
        let encoded = &self.0[DATA_URI_PREFIX.len()..];
        BASE64
            .decode(encoded)
            .map_err(|e| anyhow!("frame payload is not valid base64: {}", e))
    }

    /// Fully decodes the payload back into RGB pixels. This is the proof a
    /// processed frame is paintable.
    pub fn decode(&self) -> Result<CameraFrame> {
        let bytes = self.jpeg_bytes()?;
        let img = image::load_from_memory(&bytes).map_err(|e| anyhow!("decode frame: {}", e))?;
        let (width, height) = img.dimensions();
        CameraFrame::from_rgb(img.into_rgb8().into_raw(), width, height)
    }
}

impl std::fmt::Display for FramePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payloads are huge; show shape, not content.
        write!(f, "data:image/jpeg;base64,<{} chars>", self.0.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_frame(width: u32, height: u32) -> CameraFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        CameraFrame::from_rgb(data, width, height).expect("test frame")
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(CameraFrame::from_rgb(vec![0u8; 10], 4, 4).is_err());
        assert!(CameraFrame::from_rgb(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn encode_then_decode_preserves_dimensions() -> Result<()> {
        let frame = test_frame(64, 48);
        let jpeg = frame.to_jpeg(80)?;
        let payload = FramePayload::from_jpeg_bytes(&jpeg)?;
        assert!(payload.as_str().starts_with(DATA_URI_PREFIX));
        let decoded = payload.decode()?;
        assert_eq!(decoded.width(), 64);
        assert_eq!(decoded.height(), 48);
        Ok(())
    }

    #[test]
    fn data_uri_prefix_is_enforced() {
        assert!(FramePayload::from_data_uri("data:image/png;base64,AAAA".to_string()).is_err());
        assert!(FramePayload::from_data_uri("not a uri".to_string()).is_err());
        assert!(FramePayload::from_data_uri(DATA_URI_PREFIX.to_string()).is_err());
        let ok = FramePayload::from_data_uri(format!("{}{}", DATA_URI_PREFIX, "AAAA"));
        assert!(ok.is_ok());
    }

    #[test]
    fn garbage_base64_fails_decode_not_construction() -> Result<()> {
        let payload = FramePayload::from_data_uri(format!("{}{}", DATA_URI_PREFIX, "!!!!"))?;
        assert!(payload.jpeg_bytes().is_err());
        assert!(payload.decode().is_err());
        Ok(())
    }

    #[test]
    fn valid_base64_of_garbage_fails_image_decode() -> Result<()> {
        let payload = FramePayload::from_jpeg_bytes(b"definitely not a jpeg")?;
        assert!(payload.decode().is_err());
        Ok(())
    }
}
