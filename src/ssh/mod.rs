//! SSH session management for the tunnel
//!
//! Handshake with host key checking, single-method authentication and
//! forwarding channels over one shared session.

pub mod auth;
pub mod handler;
pub mod known_hosts;
pub mod session;

pub use auth::Credentials;
pub use known_hosts::{HostKeyStatus, KnownHosts};
pub use session::{Authenticated, SessionPhase, SshSession, Unauthenticated, handshake};
