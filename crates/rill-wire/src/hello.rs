//! Connection hellos and the server's reply
//!
//! Ingest hello is 14 bytes:
//! - Bytes 0-3: Magic `RILL`
//! - Byte 4: Wire version
//! - Byte 5: Kind (0x01)
//! - Bytes 6-13: Session ID (LE)
//!
//! Viewer hello is 23 bytes: the same prefix with kind 0x02, then
//! - Byte 14: Start mode (0 = latest, 1 = from id)
//! - Bytes 15-22: Start segment ID (LE)
//!
//! Reply is 18 bytes:
//! - Byte 0: Wire version
//! - Byte 1: Status
//! - Bytes 2-9, 10-17: Status detail (LE), e.g. the unavailable range

use rill_core::{RillError, RillResult, SegmentId, SessionId};

/// Connection preamble magic
pub const MAGIC: [u8; 4] = *b"RILL";

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Shared hello prefix: magic, version, kind, session
const PREFIX_SIZE: usize = 14;

/// Which side of the relay a connection is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HelloKind {
    Ingest = 0x01,
    Viewer = 0x02,
}

impl HelloKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(HelloKind::Ingest),
            0x02 => Some(HelloKind::Viewer),
            _ => None,
        }
    }
}

fn check_len(buf: &[u8], expected: usize) -> RillResult<()> {
    if buf.len() < expected {
        return Err(RillError::BufferTooShort {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn parse_prefix(buf: &[u8], kind: HelloKind) -> RillResult<SessionId> {
    if buf[0..4] != MAGIC {
        return Err(RillError::InvalidWireFormat("Bad magic".into()));
    }
    if buf[4] != WIRE_VERSION {
        return Err(RillError::InvalidWireFormat(format!(
            "Unsupported wire version {}",
            buf[4]
        )));
    }
    match HelloKind::from_byte(buf[5]) {
        Some(k) if k == kind => {}
        Some(other) => {
            return Err(RillError::InvalidWireFormat(format!(
                "Expected {:?} hello, got {:?}",
                kind, other
            )))
        }
        None => {
            return Err(RillError::InvalidWireFormat(format!(
                "Unknown hello kind 0x{:02x}",
                buf[5]
            )))
        }
    }
    Ok(SessionId::new(read_u64(buf, 6)))
}

fn write_prefix(buf: &mut [u8], kind: HelloKind, session: SessionId) {
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4] = WIRE_VERSION;
    buf[5] = kind as u8;
    buf[6..14].copy_from_slice(&session.to_bytes());
}

/// Sent by a producer before its media bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestHello {
    pub session: SessionId,
}

impl IngestHello {
    pub const SIZE: usize = PREFIX_SIZE;

    pub fn new(session: SessionId) -> Self {
        IngestHello { session }
    }

    pub fn parse(buf: &[u8]) -> RillResult<Self> {
        check_len(buf, Self::SIZE)?;
        let session = parse_prefix(buf, HelloKind::Ingest)?;
        Ok(IngestHello { session })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        write_prefix(&mut buf, HelloKind::Ingest, self.session);
        buf
    }
}

/// Where a viewer asks to start
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WireStart {
    #[default]
    Latest,
    From(SegmentId),
}

/// Sent by a viewer to subscribe to a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewerHello {
    pub session: SessionId,
    pub start: WireStart,
}

impl ViewerHello {
    pub const SIZE: usize = PREFIX_SIZE + 9;

    pub fn new(session: SessionId, start: WireStart) -> Self {
        ViewerHello { session, start }
    }

    pub fn parse(buf: &[u8]) -> RillResult<Self> {
        check_len(buf, Self::SIZE)?;
        let session = parse_prefix(buf, HelloKind::Viewer)?;

        let start = match buf[14] {
            0 => WireStart::Latest,
            1 => WireStart::From(SegmentId::new(read_u64(buf, 15))),
            mode => {
                return Err(RillError::InvalidWireFormat(format!(
                    "Unknown start mode {}",
                    mode
                )))
            }
        };

        Ok(ViewerHello { session, start })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        write_prefix(&mut buf, HelloKind::Viewer, self.session);
        match self.start {
            WireStart::Latest => buf[14] = 0,
            WireStart::From(id) => {
                buf[14] = 1;
                buf[15..23].copy_from_slice(&id.to_bytes());
            }
        }
        buf
    }
}

/// Outcome of a hello
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyStatus {
    Accepted = 0,
    SessionExists = 1,
    SessionNotFound = 2,
    SessionUnavailable = 3,
    RangeUnavailable = 4,
    BackfillTooLarge = 5,
    Rejected = 0xFF,
}

impl ReplyStatus {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => ReplyStatus::Accepted,
            1 => ReplyStatus::SessionExists,
            2 => ReplyStatus::SessionNotFound,
            3 => ReplyStatus::SessionUnavailable,
            4 => ReplyStatus::RangeUnavailable,
            5 => ReplyStatus::BackfillTooLarge,
            _ => ReplyStatus::Rejected,
        }
    }
}

/// Server answer to a hello
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelloReply {
    pub status: ReplyStatus,
    pub detail: (u64, u64),
}

impl HelloReply {
    pub const SIZE: usize = 18;

    pub fn accepted() -> Self {
        HelloReply {
            status: ReplyStatus::Accepted,
            detail: (0, 0),
        }
    }

    /// Reply describing why a hello was refused
    pub fn from_error(err: &RillError) -> Self {
        let (status, detail) = match err {
            RillError::SessionExists(s) => (ReplyStatus::SessionExists, (s.0, 0)),
            RillError::SessionNotFound(s) => (ReplyStatus::SessionNotFound, (s.0, 0)),
            RillError::SessionUnavailable(s) => (ReplyStatus::SessionUnavailable, (s.0, 0)),
            RillError::RangeUnavailable { from, to } => {
                (ReplyStatus::RangeUnavailable, (from.as_u64(), to.as_u64()))
            }
            RillError::BackfillTooLarge {
                requested,
                capacity,
            } => (
                ReplyStatus::BackfillTooLarge,
                (*requested as u64, *capacity as u64),
            ),
            _ => (ReplyStatus::Rejected, (0, 0)),
        };
        HelloReply { status, detail }
    }

    /// Turn the reply back into the error the server reported
    pub fn into_result(self) -> RillResult<()> {
        let (a, b) = self.detail;
        match self.status {
            ReplyStatus::Accepted => Ok(()),
            ReplyStatus::SessionExists => Err(RillError::SessionExists(SessionId::new(a))),
            ReplyStatus::SessionNotFound => Err(RillError::SessionNotFound(SessionId::new(a))),
            ReplyStatus::SessionUnavailable => {
                Err(RillError::SessionUnavailable(SessionId::new(a)))
            }
            ReplyStatus::RangeUnavailable => Err(RillError::RangeUnavailable {
                from: SegmentId::new(a),
                to: SegmentId::new(b),
            }),
            ReplyStatus::BackfillTooLarge => Err(RillError::BackfillTooLarge {
                requested: a as usize,
                capacity: b as usize,
            }),
            ReplyStatus::Rejected => Err(RillError::InvalidWireFormat(
                "Hello rejected by server".into(),
            )),
        }
    }

    pub fn parse(buf: &[u8]) -> RillResult<Self> {
        check_len(buf, Self::SIZE)?;
        if buf[0] != WIRE_VERSION {
            return Err(RillError::InvalidWireFormat(format!(
                "Unsupported wire version {}",
                buf[0]
            )));
        }
        Ok(HelloReply {
            status: ReplyStatus::from_byte(buf[1]),
            detail: (read_u64(buf, 2), read_u64(buf, 10)),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = WIRE_VERSION;
        buf[1] = self.status as u8;
        buf[2..10].copy_from_slice(&self.detail.0.to_le_bytes());
        buf[10..18].copy_from_slice(&self.detail.1.to_le_bytes());
        buf
    }
}
