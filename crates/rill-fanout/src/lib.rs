//! RILL Fanout - Segment distribution to live viewers
//!
//! A relay holds one bounded queue per viewer. Sealed segments are pushed
//! to every queue without waiting; a viewer that cannot keep up is
//! dropped rather than allowed to slow the producer or its peers.
//!
//! Viewers attach either at the live edge ([`StartAt::Latest`]) or from a
//! retained segment id ([`StartAt::From`]), in which case the retained
//! history is backfilled before live segments.

pub mod relay;
pub mod viewer;

pub use relay::*;
pub use viewer::*;
