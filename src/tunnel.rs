//! The forwarding service: setup sequence, accept loop and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::TunnelConfig;
use crate::error::TunnelError;
use crate::net::{self, LocalListener};
use crate::relay::TunnelConnection;
use crate::ssh::{self, Authenticated, Credentials, KnownHosts, SshSession};
use crate::transport::TransportHandle;

/// Counters reported when the service stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeStats {
    pub accepted: u64,
    /// Connections dropped because the gateway refused the channel
    pub refused: u64,
    /// Connections still running when the grace period ran out
    pub aborted: usize,
}

/// Per-connection settings shared by every connection task
#[derive(Debug)]
struct Forward {
    destination_host: String,
    destination_port: u16,
    buffer_size: usize,
}

/// An authenticated session plus the bound local listener
#[derive(Debug)]
pub struct Tunnel {
    session: Arc<SshSession<Authenticated>>,
    listener: LocalListener,
    forward: Arc<Forward>,
    shutdown_grace: Duration,
}

impl Tunnel {
    /// Connect, handshake, authenticate, then bind the local port.
    ///
    /// The listener is only created once the session is authenticated, so a
    /// failed setup leaves nothing bound.
    pub async fn establish(
        config: &TunnelConfig,
        transport: &TransportHandle,
    ) -> Result<Self, TunnelError> {
        let socket = net::connect(transport, &config.gateway_ip, config.gateway_port).await?;

        let known_hosts = KnownHosts::for_config(config.known_hosts_path.as_deref());
        let session = ssh::handshake(
            transport,
            socket,
            &config.gateway_ip,
            config.gateway_port,
            config.host_key_policy,
            known_hosts,
        )
        .await?;

        let session = session
            .authenticate(&Credentials::from_config(config))
            .await?;

        let listener = match net::listen(transport, &config.local_ip, config.local_port) {
            Ok(listener) => listener,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::debug!("Session close after listen failure: {}", close_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            local = %listener.local_addr(),
            gateway = %format!("{}:{}", config.gateway_ip, config.gateway_port),
            destination = %format!("{}:{}", config.destination_host, config.destination_port),
            "Tunnel established"
        );

        Ok(Self {
            session: Arc::new(session),
            listener,
            forward: Arc::new(Forward {
                destination_host: config.destination_host.clone(),
                destination_port: config.destination_port,
                buffer_size: config.buffer_size,
            }),
            shutdown_grace: config.shutdown_grace,
        })
    }

    /// Address the local listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept and forward connections until `shutdown` is cancelled or the
    /// gateway drops the session.
    ///
    /// Shutdown closes the listener first, then cancels live connections,
    /// waits up to the grace period for them and aborts the rest, and
    /// finally disconnects the session.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<ServeStats, TunnelError> {
        let Tunnel {
            session,
            listener,
            forward,
            shutdown_grace,
        } = self;

        let mut stats = ServeStats::default();
        let mut connections: JoinSet<ConnectionEnd> = JoinSet::new();
        let stop_connections = CancellationToken::new();
        let session_lost = CancellationToken::new();

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested");
                    break Ok(());
                }
                _ = session_lost.cancelled() => {
                    break Err(TunnelError::Ssh("SSH session closed".to_string()));
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        stats.accepted += 1;
                        tracing::info!(%peer, "Accepted local connection");
                        connections.spawn(forward_connection(
                            session.clone(),
                            stream,
                            peer,
                            forward.clone(),
                            stop_connections.child_token(),
                            session_lost.clone(),
                        ));
                    }
                    // Transient (e.g. out of descriptors); keep listening
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    reap(joined, &mut stats);
                }
            }
        };

        drop(listener);
        tracing::debug!(live = connections.len(), "Listener closed");

        stop_connections.cancel();
        let drained = tokio::time::timeout(shutdown_grace, async {
            while let Some(joined) = connections.join_next().await {
                reap(joined, &mut stats);
            }
        })
        .await;

        if drained.is_err() {
            stats.aborted = connections.len();
            tracing::warn!(
                aborted = stats.aborted,
                "Connections still open after {:?}; aborting",
                shutdown_grace
            );
            connections.shutdown().await;
        }

        if let Err(e) = session.close().await {
            tracing::debug!("Session close: {}", e);
        }

        tracing::info!(
            accepted = stats.accepted,
            refused = stats.refused,
            aborted = stats.aborted,
            "Tunnel stopped"
        );
        outcome.map(|()| stats)
    }
}

/// How a connection task finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionEnd {
    Relayed,
    Refused,
    Cancelled,
}

fn reap(joined: Result<ConnectionEnd, JoinError>, stats: &mut ServeStats) {
    match joined {
        Ok(ConnectionEnd::Refused) => stats.refused += 1,
        Ok(_) => {}
        Err(e) if e.is_panic() => tracing::error!("Connection task panicked: {}", e),
        Err(_) => {}
    }
}

async fn forward_connection(
    session: Arc<SshSession<Authenticated>>,
    stream: TcpStream,
    peer: SocketAddr,
    forward: Arc<Forward>,
    cancel: CancellationToken,
    session_lost: CancellationToken,
) -> ConnectionEnd {
    let work = async {
        let connection = match TunnelConnection::open(
            &session,
            stream,
            peer,
            &forward.destination_host,
            forward.destination_port,
        )
        .await
        {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(%peer, "{}", e);
                if session.is_closed() {
                    session_lost.cancel();
                }
                return ConnectionEnd::Refused;
            }
        };

        let report = connection.run(forward.buffer_size).await;
        tracing::info!(
            %peer,
            sent = report.local_to_channel.bytes,
            received = report.channel_to_local.bytes,
            clean = report.is_clean(),
            "Connection closed"
        );
        for err in report.into_errors() {
            tracing::debug!(%peer, "{}", err);
        }
        ConnectionEnd::Relayed
    };

    tokio::select! {
        end = work => end,
        _ = cancel.cancelled() => {
            tracing::debug!(%peer, "Connection cancelled by shutdown");
            ConnectionEnd::Cancelled
        }
    }
}
