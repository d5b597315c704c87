//! RILL Store - Rolling segment retention
//!
//! This crate implements the Segment Store:
//! - Bounded retention by segment count and total bytes
//! - Strict FIFO eviction in sealed order
//! - Range reads that fail rather than truncate once history is evicted
//! - Reader-friendly locking: reads never block each other, and the writer
//!   holds the lock for exactly one append/evict step

pub mod store;

pub use store::*;
