//! Sealed media segments
//!
//! A segment is an opaque, immutable slice of the producer's byte stream.
//! The payload is a reference-counted [`Bytes`], so every reader (viewer
//! queues, export snapshots) shares the same allocation.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::{CaptureTime, SegmentId};

/// Immutable media segment
#[derive(Clone, PartialEq, Eq)]
pub struct Segment {
    id: SegmentId,
    payload: Bytes,
    captured_at: CaptureTime,
    duration: Duration,
}

impl Segment {
    /// Seal a segment
    pub fn new(
        id: SegmentId,
        payload: impl Into<Bytes>,
        captured_at: CaptureTime,
        duration: Duration,
    ) -> Self {
        Segment {
            id,
            payload: payload.into(),
            captured_at,
            duration,
        }
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Payload bytes (cheap to clone)
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn captured_at(&self) -> CaptureTime {
        self.captured_at
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Payload size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("len", &self.payload.len())
            .field("captured_at", &self.captured_at)
            .field("duration", &self.duration)
            .finish()
    }
}
