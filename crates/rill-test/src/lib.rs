//! RILL Test Harness - Relay scenarios and scripted clients
//!
//! This crate provides:
//! - Scripted producer streams (fixed and seeded random)
//! - Recording and stalled viewers
//! - End-to-end relay scenarios on a single session

pub mod producer;
pub mod scenario;
pub mod viewer;

pub use producer::*;
pub use scenario::*;
pub use viewer::*;
