//! Plain TCP plumbing: the outbound connection to the gateway and the local
//! forwarding listener. Addresses are numeric IPv4 only; nothing here
//! performs name resolution.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;

use crate::error::{ConnectFailure, ListenFailure, TunnelError};
use crate::transport::TransportHandle;

/// Pending-connection queue length for the local listener
pub const LISTEN_BACKLOG: u32 = 2;

fn parse_ipv4(address: &str) -> Result<Ipv4Addr, String> {
    address
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| format!("'{}' is not a dotted-quad IPv4 address: {}", address, e))
}

fn connect_error(address: &str, port: u16, kind: ConnectFailure, reason: String) -> TunnelError {
    tracing::error!(address, port, %kind, reason = %reason, "Connection to gateway failed");
    TunnelError::Connect {
        address: address.to_string(),
        port,
        kind,
        reason,
    }
}

fn listen_error(address: &str, port: u16, kind: ListenFailure, reason: String) -> TunnelError {
    tracing::error!(address, port, %kind, reason = %reason, "Local listener setup failed");
    TunnelError::Listen {
        address: address.to_string(),
        port,
        kind,
        reason,
    }
}

/// Open a TCP connection to `address:port`, bounded by the transport's
/// connect timeout. No retry.
pub async fn connect(
    transport: &TransportHandle,
    address: &str,
    port: u16,
) -> Result<TcpStream, TunnelError> {
    tracing::info!(event = "connect_attempt", address, port, "Connecting");

    let ip = parse_ipv4(address)
        .map_err(|reason| connect_error(address, port, ConnectFailure::InvalidAddress, reason))?;

    let socket = TcpSocket::new_v4().map_err(|e| {
        connect_error(address, port, ConnectFailure::SocketCreation, e.to_string())
    })?;

    let target = SocketAddr::from((ip, port));
    let limit = transport.connect_timeout();
    let stream = timeout(limit, socket.connect(target))
        .await
        .map_err(|_| {
            connect_error(
                address,
                port,
                ConnectFailure::Timeout,
                format!("no answer within {:?}", limit),
            )
        })?
        .map_err(|e| connect_error(address, port, ConnectFailure::Connection, e.to_string()))?;

    // SSH traffic is latency sensitive
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Cannot set TCP_NODELAY on {}: {}", target, e);
    }

    tracing::info!(address, port, "Connected");
    Ok(stream)
}

/// Bound, listening local socket
#[derive(Debug)]
pub struct LocalListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl LocalListener {
    /// Wait for the next client. There is no timeout; cancel the future to
    /// stop waiting.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.listener.accept().await
    }

    /// Address actually bound; differs from the request when port 0 was used
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Bind and listen on `address:port` with `SO_REUSEADDR`.
pub fn listen(
    transport: &TransportHandle,
    address: &str,
    port: u16,
) -> Result<LocalListener, TunnelError> {
    let ip = parse_ipv4(address)
        .map_err(|reason| listen_error(address, port, ListenFailure::InvalidAddress, reason))?;

    // Sockets register with the reactor of the runtime that is current here
    let _runtime = transport.enter();

    let socket = TcpSocket::new_v4()
        .map_err(|e| listen_error(address, port, ListenFailure::SocketCreation, e.to_string()))?;

    socket
        .set_reuseaddr(true)
        .map_err(|e| listen_error(address, port, ListenFailure::SocketOption, e.to_string()))?;

    socket
        .bind(SocketAddr::from((ip, port)))
        .map_err(|e| listen_error(address, port, ListenFailure::Bind, e.to_string()))?;

    let listener = socket
        .listen(LISTEN_BACKLOG)
        .map_err(|e| listen_error(address, port, ListenFailure::Listen, e.to_string()))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| listen_error(address, port, ListenFailure::Listen, e.to_string()))?;

    tracing::info!(event = "listen_started", %local_addr, "Listening for local connections");

    Ok(LocalListener {
        listener,
        local_addr,
    })
}
