use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::client::{self, AuthResult, Handle};
use russh::{ChannelStream, Disconnect, MethodKind};
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{AuthMethod, HostKeyPolicy};
use crate::error::TunnelError;
use crate::security_log;
use crate::transport::TransportHandle;

use super::auth::{self, Credentials, ResolvedAuth};
use super::handler::ClientHandler;
use super::known_hosts::KnownHosts;

/// Where a session stands, as reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No key exchange yet, or key exchange done but no user authenticated
    Unauthenticated,
    Handshaking,
    AuthNegotiating,
    Authenticated,
    Failed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionPhase::Unauthenticated => "unauthenticated",
            SessionPhase::Handshaking => "handshaking",
            SessionPhase::AuthNegotiating => "auth_negotiating",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Marker: key exchange done, user not authenticated
#[derive(Debug)]
pub enum Unauthenticated {}

/// Marker: ready to open channels
#[derive(Debug)]
pub enum Authenticated {}

/// An SSH connection to the gateway. Dropping it closes the connection.
pub struct SshSession<S> {
    handle: Handle<ClientHandler>,
    host: String,
    port: u16,
    username: Option<String>,
    _state: PhantomData<S>,
}

impl<S> std::fmt::Debug for SshSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("handle", &"<handle>")
            .finish()
    }
}

impl<S> SshSession<S> {
    /// Whether the underlying connection has gone away
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

fn failed(host: &str, port: u16, err: &TunnelError) {
    tracing::error!(phase = %SessionPhase::Failed, host, port, "{}", err);
}

/// Run the SSH key exchange over an already connected socket.
///
/// The socket is owned by the session from here on. The whole exchange is
/// bounded by the transport's connect timeout.
pub async fn handshake(
    transport: &TransportHandle,
    socket: TcpStream,
    host: &str,
    port: u16,
    policy: HostKeyPolicy,
    known_hosts: KnownHosts,
) -> Result<SshSession<Unauthenticated>, TunnelError> {
    tracing::info!(
        phase = %SessionPhase::Handshaking,
        host,
        port,
        %policy,
        "Starting SSH handshake"
    );

    let handler = ClientHandler::new(host.to_string(), port, policy, Arc::new(known_hosts));
    let limit = transport.connect_timeout();

    let connecting = client::connect_stream(transport.ssh_config(), socket, handler);
    let result = match timeout(limit, connecting).await {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e @ TunnelError::HostKeyRejected { .. })) => Err(e),
        Ok(Err(e)) => Err(TunnelError::Handshake {
            reason: match e {
                TunnelError::Ssh(reason) => reason,
                other => other.to_string(),
            },
        }),
        Err(_) => Err(TunnelError::Handshake {
            reason: format!("no key exchange within {:?}", limit),
        }),
    };

    match result {
        Ok(handle) => {
            tracing::info!(phase = %SessionPhase::Unauthenticated, host, port, "SSH handshake complete");
            Ok(SshSession {
                handle,
                host: host.to_string(),
                port,
                username: None,
                _state: PhantomData,
            })
        }
        Err(e) => {
            failed(host, port, &e);
            Err(e)
        }
    }
}

impl SshSession<Unauthenticated> {
    /// Authenticate with exactly one method.
    ///
    /// The gateway is first probed with a `none` request to learn which
    /// methods it offers. A method it does not offer fails without any
    /// credentials being sent. If the probe itself is accepted the session
    /// is authenticated as is.
    pub async fn authenticate(
        mut self,
        credentials: &Credentials,
    ) -> Result<SshSession<Authenticated>, TunnelError> {
        match self.negotiate(credentials).await {
            Ok(()) => {
                tracing::info!(
                    phase = %SessionPhase::Authenticated,
                    host = %self.host,
                    port = self.port,
                    username = credentials.username(),
                    "Auth method succeeded"
                );
                Ok(SshSession {
                    handle: self.handle,
                    host: self.host,
                    port: self.port,
                    username: Some(credentials.username().to_string()),
                    _state: PhantomData,
                })
            }
            Err(e) => {
                failed(&self.host, self.port, &e);
                Err(e)
            }
        }
    }

    async fn negotiate(&mut self, credentials: &Credentials) -> Result<(), TunnelError> {
        let method = credentials.method();
        let username = credentials.username();
        let (host, port) = (self.host.clone(), self.port);
        let auth_failed = |reason: String| {
            security_log::log_auth_failure(&host, port, username, method.as_str(), &reason);
            TunnelError::AuthFailed { method, reason }
        };

        tracing::info!(
            phase = %SessionPhase::AuthNegotiating,
            host = %host,
            port,
            username,
            %method,
            "Querying authentication methods"
        );

        let probe = self
            .handle
            .authenticate_none(username)
            .await
            .map_err(|e| auth_failed(e.to_string()))?;

        let advertised: Vec<MethodKind> = match probe {
            AuthResult::Success => {
                security_log::log_auth_success(&host, port, username, AuthMethod::None.as_str());
                return Ok(());
            }
            AuthResult::Failure {
                remaining_methods, ..
            } => remaining_methods.iter().copied().collect(),
        };
        let offered = auth::describe_methods(&advertised);
        tracing::debug!(host = %host, port, offered = %offered, "Gateway authentication methods");

        // `none` was already tried by the probe; it only counts when accepted
        if method == AuthMethod::None || !advertised.contains(&auth::method_kind(method)) {
            security_log::log_auth_method_unsupported(&host, port, method.as_str(), &offered);
            return Err(TunnelError::AuthMethodUnsupported {
                requested: method,
                advertised: offered,
            });
        }

        let resolved = credentials.resolve()?;
        security_log::log_auth_attempt(&host, port, username, method.as_str());

        let result = match resolved {
            ResolvedAuth::Password(password) => {
                self.handle
                    .authenticate_password(username, password.expose_secret())
                    .await
            }
            ResolvedAuth::PublicKey(key) => self.handle.authenticate_publickey(username, key).await,
            ResolvedAuth::None => {
                return Err(auth_failed("no credentials for the none method".to_string()));
            }
        }
        .map_err(|e| auth_failed(e.to_string()))?;

        if !result.success() {
            return Err(auth_failed("credentials rejected by gateway".to_string()));
        }

        security_log::log_auth_success(&host, port, username, method.as_str());
        Ok(())
    }
}

impl SshSession<Authenticated> {
    /// Open a `direct-tcpip` channel to `host:port` as seen from the gateway.
    /// The destination is passed through verbatim; it is never resolved here.
    pub async fn open_forward(
        &self,
        host: &str,
        port: u16,
        originator: SocketAddr,
    ) -> Result<ChannelStream<client::Msg>, TunnelError> {
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                host,
                u32::from(port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| TunnelError::ChannelOpen {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?;

        tracing::debug!(
            channel = ?channel.id(),
            destination_host = host,
            destination_port = port,
            %originator,
            "Channel opened"
        );
        Ok(channel.into_stream())
    }

    /// Disconnect from the gateway
    pub async fn close(&self) -> Result<(), TunnelError> {
        tracing::info!(host = %self.host, port = self.port, "Closing SSH session");
        if self.handle.is_closed() {
            return Ok(());
        }
        self.handle
            .disconnect(Disconnect::ByApplication, "tunnel closed", "en")
            .await
            .map_err(TunnelError::from)
    }
}
