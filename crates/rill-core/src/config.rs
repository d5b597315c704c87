//! Component configuration
//!
//! Durations deserialize from human-readable strings (`"2s"`, `"500ms"`).

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::{RillError, RillResult};

/// Segment store capacity. Whichever bound is hit first triggers eviction.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum retained segments
    pub max_segments: usize,
    /// Maximum retained payload bytes
    pub max_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_segments: 30,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Count-bounded store with an effectively unlimited byte bound
    pub fn with_max_segments(max_segments: usize) -> Self {
        StoreConfig {
            max_segments,
            max_bytes: usize::MAX,
        }
    }

    pub fn validate(&self) -> RillResult<()> {
        if self.max_segments == 0 {
            return Err(RillError::InvalidConfig(
                "store.max_segments must be at least 1".into(),
            ));
        }
        if self.max_bytes == 0 {
            return Err(RillError::InvalidConfig(
                "store.max_bytes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Ingest slicing thresholds
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Seal a segment once it has been open this long
    #[serde(deserialize_with = "deserialize_duration")]
    pub target_duration: Duration,
    /// Seal a segment once it holds this many bytes
    pub max_segment_bytes: usize,
    /// Read buffer size for the producer stream
    pub read_chunk_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            target_duration: Duration::from_secs(2),
            max_segment_bytes: 2 * 1024 * 1024,
            read_chunk_size: 16 * 1024,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> RillResult<()> {
        if self.target_duration.is_zero() {
            return Err(RillError::InvalidConfig(
                "ingest.target_duration must be non-zero".into(),
            ));
        }
        if self.max_segment_bytes == 0 {
            return Err(RillError::InvalidConfig(
                "ingest.max_segment_bytes must be at least 1".into(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(RillError::InvalidConfig(
                "ingest.read_chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Per-viewer delivery policy
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FanoutConfig {
    /// Bounded outbound queue per viewer
    pub queue_capacity: usize,
    /// Pending segments older than this detach the viewer
    #[serde(deserialize_with = "deserialize_duration")]
    pub delivery_timeout: Duration,
    /// How often idle relays are swept for timed-out viewers
    #[serde(deserialize_with = "deserialize_duration")]
    pub sweep_interval: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        FanoutConfig {
            queue_capacity: 8,
            delivery_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl FanoutConfig {
    pub fn validate(&self) -> RillResult<()> {
        if self.queue_capacity == 0 {
            return Err(RillError::InvalidConfig(
                "fanout.queue_capacity must be at least 1".into(),
            ));
        }
        if self.delivery_timeout.is_zero() || self.sweep_interval.is_zero() {
            return Err(RillError::InvalidConfig(
                "fanout timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a human-readable duration (`"2s"`, `"1m 30s"`, `"250ms"`)
pub fn parse_duration(text: &str) -> RillResult<Duration> {
    humantime::parse_duration(text.trim())
        .map_err(|e| RillError::InvalidConfig(format!("bad duration {:?}: {}", text, e)))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
}
