//! Security event logging for audit trails.
//!
//! Authentication attempts and host key decisions are logged with
//! `target: "security"` so they can be filtered independently:
//!
//! ```bash
//! RUST_LOG=security=info sshfwd
//! ```

use tracing::{info, warn};

/// Log an SSH authentication attempt.
///
/// Called before credentials are sent to the gateway.
pub fn log_auth_attempt(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_attempt",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication attempt"
    );
}

/// Log a successful SSH authentication.
pub fn log_auth_success(host: &str, port: u16, username: &str, method: &str) {
    info!(
        target: "security",
        event = "auth_success",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        "SSH authentication succeeded"
    );
}

/// Log a failed SSH authentication attempt.
pub fn log_auth_failure(host: &str, port: u16, username: &str, method: &str, reason: &str) {
    warn!(
        target: "security",
        event = "auth_failure",
        host = %host,
        port = port,
        username = %username,
        method = %method,
        reason = %reason,
        "SSH authentication failed"
    );
}

/// Log a selected method the gateway does not offer. No credentials were sent.
pub fn log_auth_method_unsupported(host: &str, port: u16, method: &str, advertised: &str) {
    warn!(
        target: "security",
        event = "auth_method_unsupported",
        host = %host,
        port = port,
        method = %method,
        advertised = %advertised,
        "Authentication method not offered by gateway"
    );
}

/// Log acceptance of a host key, either already stored or newly learned.
pub fn log_host_key_accepted(host: &str, port: u16, fingerprint: &str, learned: bool) {
    if learned {
        warn!(
            target: "security",
            event = "host_key_learned",
            host = %host,
            port = port,
            fingerprint = %fingerprint,
            "Trusting host key on first use"
        );
    } else {
        info!(
            target: "security",
            event = "host_key_accepted",
            host = %host,
            port = port,
            fingerprint = %fingerprint,
            "Host key verified"
        );
    }
}

/// Log a host key accepted without any check.
pub fn log_host_key_unchecked(host: &str, port: u16, fingerprint: &str) {
    warn!(
        target: "security",
        event = "host_key_unchecked",
        host = %host,
        port = port,
        fingerprint = %fingerprint,
        "Host key NOT verified"
    );
}

/// Log a host key refusal.
pub fn log_host_key_rejected(host: &str, port: u16, reason: &str) {
    warn!(
        target: "security",
        event = "host_key_rejected",
        host = %host,
        port = port,
        reason = %reason,
        "Host key rejected"
    );
}
