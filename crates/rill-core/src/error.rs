//! Error types for the relay

use std::fmt;

use thiserror::Error;

use crate::{SegmentId, SessionId, SessionState, ViewerId};

/// Why a viewer stopped receiving segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// Outbound queue was full when a segment was published
    QueueOverflow,
    /// Segments stayed pending longer than the delivery timeout
    DeliveryTimeout,
    /// Viewer detached itself, or its connection closed
    Detached,
    /// Producer stream ended; all queued segments were delivered
    SessionEnded,
    /// Producer stream errored; the session is unavailable
    SessionFailed,
}

impl DisconnectReason {
    pub fn name(self) -> &'static str {
        match self {
            DisconnectReason::QueueOverflow => "queue_overflow",
            DisconnectReason::DeliveryTimeout => "delivery_timeout",
            DisconnectReason::Detached => "detached",
            DisconnectReason::SessionEnded => "session_ended",
            DisconnectReason::SessionFailed => "session_failed",
        }
    }

    /// Was the viewer removed by the relay rather than by itself?
    pub fn is_drop(self) -> bool {
        matches!(
            self,
            DisconnectReason::QueueOverflow | DisconnectReason::DeliveryTimeout
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Relay errors
#[derive(Error, Debug)]
pub enum RillError {
    // Store errors
    #[error("Range unavailable: segments {from}..={to} are not fully retained")]
    RangeUnavailable { from: SegmentId, to: SegmentId },

    #[error("Invalid range: {from} > {to}")]
    InvalidRange { from: SegmentId, to: SegmentId },

    #[error("Segment store is empty")]
    Empty,

    #[error("Segment {id} out of order: newest sealed is {latest}")]
    OutOfOrder { id: SegmentId, latest: SegmentId },

    #[error("Segment too large: {size} bytes exceeds store bound of {limit}")]
    SegmentTooLarge { size: usize, limit: usize },

    // Relay errors
    #[error("Backfill of {requested} segments exceeds viewer queue capacity {capacity}")]
    BackfillTooLarge { requested: usize, capacity: usize },

    #[error("Viewer {viewer} disconnected: {reason}")]
    ViewerDisconnected {
        viewer: ViewerId,
        reason: DisconnectReason,
    },

    // Ingest errors
    #[error("Ingest terminated for session {0}")]
    IngestTerminated(SessionId),

    #[error("Ingest failed for session {session}: {reason}")]
    IngestFailed { session: SessionId, reason: String },

    // Session errors
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session already live: {0}")]
    SessionExists(SessionId),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(SessionId),

    #[error("Session {session}: illegal transition {from} -> {to}")]
    InvalidTransition {
        session: SessionId,
        from: SessionState,
        to: SessionState,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay operations
pub type RillResult<T> = Result<T, RillError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RillError::RangeUnavailable {
            from: SegmentId::new(1),
            to: SegmentId::new(2),
        };
        assert_eq!(
            err.to_string(),
            "Range unavailable: segments 1..=2 are not fully retained"
        );

        let err = RillError::ViewerDisconnected {
            viewer: ViewerId::new(3),
            reason: DisconnectReason::QueueOverflow,
        };
        assert_eq!(err.to_string(), "Viewer 3 disconnected: queue_overflow");
    }

    #[test]
    fn test_drop_reasons() {
        assert!(DisconnectReason::QueueOverflow.is_drop());
        assert!(DisconnectReason::DeliveryTimeout.is_drop());
        assert!(!DisconnectReason::Detached.is_drop());
        assert!(!DisconnectReason::SessionEnded.is_drop());
    }
}
