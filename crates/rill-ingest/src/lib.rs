//! RILL Ingest - producer stream to sealed segments
//!
//! One producer per session. Bytes are buffered until the target segment
//! duration elapses or the byte threshold is reached, then sealed and
//! published. End of stream and stream errors both seal the remaining
//! bytes as a final short segment.

pub mod segmenter;
pub mod writer;

pub use segmenter::*;
pub use writer::*;
