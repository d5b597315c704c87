//! RILL Runtime - Sessions and the relay node
//!
//! This crate wires the relay components into a running node:
//! - `Session`: store + relay + exporter behind the session state machine
//! - `SessionManager`: session registry, ingest driving, archiving, reaping
//! - `RelayServer`: TCP listeners for producers and viewers
//! - Configuration loading and logging initialization

pub mod client;
pub mod config;
pub mod manager;
pub mod server;
pub mod session;
pub mod telemetry;

pub use client::*;
pub use config::*;
pub use manager::*;
pub use server::*;
pub use session::*;
pub use telemetry::*;
