//! Remote snapshot frame source.
//!
//! Provides `SnapshotSource` for pulling single JPEG stills from a
//! network camera's snapshot endpoint.
//!
//! The snapshot source is responsible for:
//! - Fetching one JPEG per request from the configured URL
//! - Appending a cache-busting query parameter to every request
//! - Producing ready-to-submit `FramePayload`s
//!
//! The snapshot source MUST NOT:
//! - Pace itself; the owning loop decides when to fetch
//! - Decode frames; the payload is passed through as captured

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

use crate::frame::FramePayload;

/// Configuration for a snapshot source.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Snapshot endpoint URL.
    pub url: String,
    /// Per-request timeout. `None` uses the transport default.
    pub timeout: Option<Duration>,
}

/// Counters for health logging.
#[derive(Clone, Debug)]
pub struct SnapshotStats {
    pub fetches: u64,
    pub source: String,
}

/// Pulls JPEG stills over HTTP, one per call.
pub struct SnapshotSource {
    config: SnapshotConfig,
    base: Url,
    fetches: u64,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        let base = Url::parse(&config.url).context("parse snapshot url")?;
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(anyhow!(
                    "unsupported snapshot scheme '{}'; expected http(s)",
                    other
                ))
            }
        }
        Ok(Self {
            config,
            base,
            fetches: 0,
        })
    }

    /// Fetches one still. A non-2xx reply or an empty body is an error.
    pub fn fetch(&mut self) -> Result<FramePayload> {
        let url = self.cache_busted_url();
        let mut request = ureq::get(url.as_str());
        if let Some(timeout) = self.config.timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.config.url))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        let payload = FramePayload::from_jpeg_bytes(&bytes)?;
        self.fetches += 1;
        Ok(payload)
    }

    /// Caches along the path would otherwise replay stale stills.
    fn cache_busted_url(&self) -> Url {
        let mut url = self.base.clone();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or(0);
        url.query_pairs_mut().append_pair("t", &millis.to_string());
        url
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            fetches: self.fetches,
            source: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(url: &str) -> SnapshotConfig {
        SnapshotConfig {
            url: url.to_string(),
            timeout: Some(Duration::from_millis(500)),
        }
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(SnapshotSource::new(stub_config("rtsp://cam/stream")).is_err());
        assert!(SnapshotSource::new(stub_config("not a url")).is_err());
    }

    #[test]
    fn cache_buster_is_appended() -> Result<()> {
        let source = SnapshotSource::new(stub_config("http://cam.local/api/espcam/snapshot"))?;
        let url = source.cache_busted_url();
        assert!(url.as_str().starts_with("http://cam.local/api/espcam/snapshot?t="));
        Ok(())
    }

    #[test]
    fn cache_buster_keeps_existing_query() -> Result<()> {
        let source = SnapshotSource::new(stub_config("http://cam.local/snap?res=vga"))?;
        let url = source.cache_busted_url();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0].0, "res");
        assert_eq!(pairs[1].0, "t");
        Ok(())
    }
}
