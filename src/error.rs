use std::path::PathBuf;
use thiserror::Error;

use crate::config::AuthMethod;
use crate::relay::Direction;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not determine config file path")]
    NoConfigPath,

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

/// Why an outbound connection to the gateway failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    SocketCreation,
    InvalidAddress,
    Connection,
    Timeout,
}

impl std::fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectFailure::SocketCreation => "socket creation failed",
            ConnectFailure::InvalidAddress => "invalid address",
            ConnectFailure::Connection => "connection failed",
            ConnectFailure::Timeout => "timed out",
        };
        f.write_str(label)
    }
}

/// Why the local listener could not be set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenFailure {
    SocketCreation,
    InvalidAddress,
    SocketOption,
    Bind,
    Listen,
}

impl std::fmt::Display for ListenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ListenFailure::SocketCreation => "socket creation failed",
            ListenFailure::InvalidAddress => "invalid address",
            ListenFailure::SocketOption => "cannot set socket option",
            ListenFailure::Bind => "cannot bind",
            ListenFailure::Listen => "cannot listen",
        };
        f.write_str(label)
    }
}

/// Tunnel errors, from bootstrap through per-connection relay
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Transport bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Connection to {address}:{port} failed ({kind}): {reason}")]
    Connect {
        address: String,
        port: u16,
        kind: ConnectFailure,
        reason: String,
    },

    #[error("Cannot listen on {address}:{port} ({kind}): {reason}")]
    Listen {
        address: String,
        port: u16,
        kind: ListenFailure,
        reason: String,
    },

    #[error("SSH handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("Host key for {host}:{port} rejected: {reason}")]
    HostKeyRejected {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Authentication method '{requested}' not offered by gateway (offered: {advertised})")]
    AuthMethodUnsupported {
        requested: AuthMethod,
        advertised: String,
    },

    #[error("Authentication by {method} failed: {reason}")]
    AuthFailed { method: AuthMethod, reason: String },

    #[error("Key file error: {0}")]
    KeyFile(String),

    #[error("Cannot open channel to {host}:{port}: {reason}")]
    ChannelOpen {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Relay I/O error ({direction}): {source}")]
    RelayIo {
        direction: Direction,
        source: std::io::Error,
    },

    #[error("russh error: {0}")]
    Ssh(String),
}

impl From<russh::Error> for TunnelError {
    fn from(err: russh::Error) -> Self {
        TunnelError::Ssh(err.to_string())
    }
}
