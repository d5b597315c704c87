//! Node configuration
//!
//! Defaults, optionally overlaid by a JSON file (`RILL_CONFIG`) and then
//! by individual `RILL_*` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use rill_core::{parse_duration, FanoutConfig, IngestConfig, RillError, RillResult, StoreConfig};

/// Listener and archive settings
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Producers connect here
    pub ingest_addr: SocketAddr,
    /// Viewers connect here
    pub viewer_addr: SocketAddr,
    /// Cleanly terminated sessions are archived here when set
    pub archive_dir: Option<PathBuf>,
    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ingest_addr: SocketAddr::from(([0, 0, 0, 0], 7700)),
            viewer_addr: SocketAddr::from(([0, 0, 0, 0], 7701)),
            archive_dir: None,
            json_logs: false,
        }
    }
}

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RillConfig {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub fanout: FanoutConfig,
    pub server: ServerConfig,
}

impl RillConfig {
    /// Read a JSON config file; missing fields keep their defaults
    pub fn load(path: &Path) -> RillResult<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| RillError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Build from the process environment
    pub fn from_env() -> RillResult<Self> {
        let base = match std::env::var_os("RILL_CONFIG") {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `RILL_*` overrides looked up through `lookup`
    pub fn with_overrides<F>(mut self, lookup: F) -> RillResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RILL_INGEST_ADDR") {
            self.server.ingest_addr = parse_value("RILL_INGEST_ADDR", &v)?;
        }
        if let Some(v) = lookup("RILL_VIEWER_ADDR") {
            self.server.viewer_addr = parse_value("RILL_VIEWER_ADDR", &v)?;
        }
        if let Some(v) = lookup("RILL_ARCHIVE_DIR") {
            self.server.archive_dir = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Some(v) = lookup("RILL_LOG_JSON") {
            self.server.json_logs = parse_value("RILL_LOG_JSON", &v)?;
        }

        if let Some(v) = lookup("RILL_MAX_SEGMENTS") {
            self.store.max_segments = parse_value("RILL_MAX_SEGMENTS", &v)?;
        }
        if let Some(v) = lookup("RILL_MAX_BYTES") {
            self.store.max_bytes = parse_value("RILL_MAX_BYTES", &v)?;
        }

        if let Some(v) = lookup("RILL_SEGMENT_DURATION") {
            self.ingest.target_duration = parse_duration(&v)?;
        }
        if let Some(v) = lookup("RILL_MAX_SEGMENT_BYTES") {
            self.ingest.max_segment_bytes = parse_value("RILL_MAX_SEGMENT_BYTES", &v)?;
        }

        if let Some(v) = lookup("RILL_QUEUE_CAPACITY") {
            self.fanout.queue_capacity = parse_value("RILL_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("RILL_DELIVERY_TIMEOUT") {
            self.fanout.delivery_timeout = parse_duration(&v)?;
        }
        if let Some(v) = lookup("RILL_SWEEP_INTERVAL") {
            self.fanout.sweep_interval = parse_duration(&v)?;
        }

        Ok(self)
    }

    pub fn validate(&self) -> RillResult<()> {
        self.store.validate()?;
        self.ingest.validate()?;
        self.fanout.validate()?;

        if self.ingest.max_segment_bytes > self.store.max_bytes {
            return Err(RillError::InvalidConfig(format!(
                "ingest.max_segment_bytes ({}) exceeds store.max_bytes ({})",
                self.ingest.max_segment_bytes, self.store.max_bytes
            )));
        }
        if self.server.ingest_addr == self.server.viewer_addr && self.server.ingest_addr.port() != 0
        {
            return Err(RillError::InvalidConfig(
                "ingest and viewer listeners share an address".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> RillResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RillError::InvalidConfig(format!("{}={:?}: {}", key, value, e)))
}
