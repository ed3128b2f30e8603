use std::future::Future;
use std::sync::Arc;

use russh::client::Handler;
use russh::keys::PublicKey;

use crate::config::HostKeyPolicy;
use crate::error::TunnelError;
use crate::security_log;

use super::known_hosts::{HostKeyStatus, KnownHosts};

/// Outcome of applying a policy to a known_hosts lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostKeyDecision {
    Accept,
    /// Accept and record the key
    Learn,
    Reject(String),
}

pub(crate) fn decide(policy: HostKeyPolicy, status: &HostKeyStatus) -> HostKeyDecision {
    match (policy, status) {
        (HostKeyPolicy::Skip, _) => HostKeyDecision::Accept,
        (_, HostKeyStatus::Known) => HostKeyDecision::Accept,
        (_, HostKeyStatus::Revoked { fingerprint }) => {
            HostKeyDecision::Reject(format!("key {} has been revoked", fingerprint))
        }
        (
            _,
            HostKeyStatus::Changed {
                old_fingerprint,
                new_fingerprint,
                key_type,
            },
        ) => HostKeyDecision::Reject(format!(
            "{} key CHANGED from {} to {}",
            key_type, old_fingerprint, new_fingerprint
        )),
        (HostKeyPolicy::TrustOnFirstUse, HostKeyStatus::Unknown { .. }) => HostKeyDecision::Learn,
        (HostKeyPolicy::Verify, HostKeyStatus::Unknown { fingerprint, key_type }) => {
            HostKeyDecision::Reject(format!(
                "{} key {} is not in known_hosts",
                key_type, fingerprint
            ))
        }
    }
}

/// SSH client handler: checks the gateway's host key
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: Arc<KnownHosts>,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy, known_hosts: Arc<KnownHosts>) -> Self {
        Self {
            host,
            port,
            policy,
            known_hosts,
        }
    }
}

impl Handler for ClientHandler {
    type Error = TunnelError;

    fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send {
        let host = self.host.clone();
        let port = self.port;
        let policy = self.policy;
        let known_hosts = self.known_hosts.clone();
        let key = server_public_key.clone();

        async move {
            let fingerprint = KnownHosts::fingerprint(&key);

            if policy == HostKeyPolicy::Skip {
                security_log::log_host_key_unchecked(&host, port, &fingerprint);
                return Ok(true);
            }

            let status = tokio::task::spawn_blocking({
                let known_hosts = known_hosts.clone();
                let host = host.clone();
                let key = key.clone();
                move || known_hosts.check(&host, port, &key)
            })
            .await
            .map_err(|e| TunnelError::HostKeyRejected {
                host: host.clone(),
                port,
                reason: format!("host key check failed: {}", e),
            })?;

            match decide(policy, &status) {
                HostKeyDecision::Accept => {
                    security_log::log_host_key_accepted(&host, port, &fingerprint, false);
                    Ok(true)
                }
                HostKeyDecision::Learn => {
                    // Fail closed if the key cannot be persisted
                    let written = tokio::task::spawn_blocking({
                        let host = host.clone();
                        move || known_hosts.learn(&host, port, &key)
                    })
                    .await
                    .map_err(|e| TunnelError::HostKeyRejected {
                        host: host.clone(),
                        port,
                        reason: format!("host key store task failed: {}", e),
                    })?;

                    match written {
                        Ok(path) => {
                            tracing::debug!("Recorded host key in {}", path.display());
                            security_log::log_host_key_accepted(&host, port, &fingerprint, true);
                            Ok(true)
                        }
                        Err(e) => {
                            security_log::log_host_key_rejected(&host, port, &e.to_string());
                            Err(e)
                        }
                    }
                }
                HostKeyDecision::Reject(reason) => {
                    security_log::log_host_key_rejected(&host, port, &reason);
                    Err(TunnelError::HostKeyRejected { host, port, reason })
                }
            }
        }
    }
}
