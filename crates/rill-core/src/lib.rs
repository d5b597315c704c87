//! RILL Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout the relay:
//! - Identifiers (SessionId, SegmentId, ViewerId)
//! - Capture time
//! - Sealed media segments
//! - Session lifecycle states
//! - Error taxonomy
//! - Component configuration

pub mod id;
pub mod time;
pub mod segment;
pub mod state;
pub mod error;
pub mod config;

pub use id::*;
pub use time::*;
pub use segment::*;
pub use state::*;
pub use error::*;
pub use config::*;
