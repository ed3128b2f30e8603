//! Byte pump between one local connection and one SSH channel.
//!
//! Both directions run concurrently in the same task. When a direction's
//! source reaches EOF, or fails, the write side of its destination is shut
//! down and the other direction keeps going until it finishes on its own.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TunnelError;
use crate::ssh::{Authenticated, SshSession};

/// One half of a relayed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LocalToChannel,
    ChannelToLocal,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::LocalToChannel => f.write_str("local->channel"),
            Direction::ChannelToLocal => f.write_str("channel->local"),
        }
    }
}

/// What happened in one direction
#[derive(Debug)]
pub struct DirectionReport {
    pub direction: Direction,
    /// Bytes fully written to the destination
    pub bytes: u64,
    /// `None` when the source reached EOF
    pub error: Option<std::io::Error>,
}

impl DirectionReport {
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of relaying one connection to completion
#[derive(Debug)]
pub struct RelayReport {
    pub local_to_channel: DirectionReport,
    pub channel_to_local: DirectionReport,
}

impl RelayReport {
    pub fn is_clean(&self) -> bool {
        self.local_to_channel.is_clean() && self.channel_to_local.is_clean()
    }

    /// I/O failures, one per failed direction
    pub fn into_errors(self) -> Vec<TunnelError> {
        [self.local_to_channel, self.channel_to_local]
            .into_iter()
            .filter_map(|report| {
                report.error.map(|source| TunnelError::RelayIo {
                    direction: report.direction,
                    source,
                })
            })
            .collect()
    }
}

async fn pump<R, W>(
    mut source: R,
    mut sink: W,
    buffer_size: usize,
    direction: Direction,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut bytes = 0u64;

    let error = loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(e),
        };
        if let Err(e) = sink.write_all(&buf[..n]).await {
            break Some(e);
        }
        if let Err(e) = sink.flush().await {
            break Some(e);
        }
        bytes += n as u64;
    };

    // Propagate the half-close; the peer may already be gone
    if let Err(e) = sink.shutdown().await {
        tracing::debug!(%direction, "Shutdown of write side failed: {}", e);
    }

    match &error {
        None => tracing::debug!(%direction, bytes, "Direction closed"),
        Some(e) => tracing::warn!(%direction, bytes, error = %e, "Relay error"),
    }

    DirectionReport {
        direction,
        bytes,
        error,
    }
}

/// Relay until both directions have finished.
pub async fn relay<L, C>(local: L, channel: C, buffer_size: usize) -> RelayReport
where
    L: AsyncRead + AsyncWrite,
    C: AsyncRead + AsyncWrite,
{
    let (local_read, local_write) = tokio::io::split(local);
    let (channel_read, channel_write) = tokio::io::split(channel);

    let (local_to_channel, channel_to_local) = tokio::join!(
        pump(local_read, channel_write, buffer_size, Direction::LocalToChannel),
        pump(channel_read, local_write, buffer_size, Direction::ChannelToLocal),
    );

    RelayReport {
        local_to_channel,
        channel_to_local,
    }
}

/// An accepted local socket paired with its forwarding channel
pub struct TunnelConnection {
    local: TcpStream,
    peer: SocketAddr,
    channel: russh::ChannelStream<russh::client::Msg>,
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("peer", &self.peer)
            .field("channel", &"<channel>")
            .finish()
    }
}

impl TunnelConnection {
    /// Open the forwarding channel for an accepted socket. On failure the
    /// socket is dropped, closing it.
    pub async fn open(
        session: &SshSession<Authenticated>,
        local: TcpStream,
        peer: SocketAddr,
        destination_host: &str,
        destination_port: u16,
    ) -> Result<Self, TunnelError> {
        let channel = session
            .open_forward(destination_host, destination_port, peer)
            .await?;
        Ok(Self {
            local,
            peer,
            channel,
        })
    }

    /// Relay to completion; both endpoints are released on return
    pub async fn run(self, buffer_size: usize) -> RelayReport {
        if let Err(e) = self.local.set_nodelay(true) {
            tracing::debug!(peer = %self.peer, "Cannot set TCP_NODELAY: {}", e);
        }
        relay(self.local, self.channel, buffer_size).await
    }
}
