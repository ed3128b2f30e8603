//! sshfwd: TCP port forwarding through an SSH gateway
//!
//! This module exposes the core functionality for use in integration tests
//! and the main binary.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod net;
pub mod relay;
pub mod ssh;
pub mod transport;
pub mod tunnel;

pub(crate) mod security_log;

pub use config::TunnelConfig;
pub use error::TunnelError;
pub use transport::{Transport, TransportHandle, TransportSettings};
pub use tunnel::{ServeStats, Tunnel};
