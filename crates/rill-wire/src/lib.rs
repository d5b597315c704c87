//! RILL Wire Protocol - Binary framing for relay connections
//!
//! Every connection opens with a fixed-size hello:
//! - Producers send an [`IngestHello`] followed by raw media bytes
//! - Viewers send a [`ViewerHello`] and then receive [`Frame`]s
//!
//! The server answers each hello with a [`HelloReply`].
//! All integers are little-endian.

pub mod frame;
pub mod hello;

pub use frame::*;
pub use hello::*;
