//! RILL Export - Recordings from the retained window
//!
//! An export snapshots a contiguous range of the segment store and writes
//! the payloads, in id order, to any `AsyncWrite` sink. No store lock is
//! held while writing. A segment evicted before it is written fails the
//! export instead of truncating it.

pub mod exporter;

pub use exporter::*;
