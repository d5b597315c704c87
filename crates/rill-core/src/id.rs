//! Identity types for the relay
//!
//! All identifiers are 64-bit so they travel in fixed-width wire fields.

use std::fmt;

/// Session identity - one continuous ingest lifecycle
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const ZERO: SessionId = SessionId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        SessionId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SessionId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session({:016x})", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Segment identity - monotonically increasing within a session
///
/// The first segment of a session is [`SegmentId::FIRST`]. Zero is never
/// assigned to a sealed segment, which lets it act as "before everything".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SegmentId(pub u64);

impl SegmentId {
    pub const ZERO: SegmentId = SegmentId(0);
    pub const FIRST: SegmentId = SegmentId(1);

    #[inline]
    pub fn new(id: u64) -> Self {
        SegmentId(id)
    }

    #[inline]
    pub fn next(self) -> Self {
        SegmentId(self.0.saturating_add(1))
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SegmentId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seg({})", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Viewer identity - a connection handle registered with a relay
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ViewerId(pub u64);

impl ViewerId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ViewerId(id)
    }
}

impl fmt::Debug for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Viewer({})", self.0)
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new(0xDEADBEEF_CAFEBABE);
        let recovered = SessionId::from_bytes(id.to_bytes());
        assert_eq!(id, recovered);
        assert_eq!(format!("{}", id), "deadbeefcafebabe");
    }

    #[test]
    fn test_segment_id_ordering() {
        let a = SegmentId::FIRST;
        let b = a.next();
        assert!(a < b);
        assert!(SegmentId::ZERO < SegmentId::FIRST);
        assert_eq!(b, SegmentId::new(2));
    }

    #[test]
    fn test_segment_id_next_saturates() {
        let last = SegmentId::new(u64::MAX);
        assert_eq!(last.next(), last);
    }
}
