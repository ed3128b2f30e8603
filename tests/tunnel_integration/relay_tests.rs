//! Forwarding traffic through an established tunnel

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use secrecy::SecretString;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sshfwd::config::AuthMethod;
use sshfwd::{ServeStats, TransportHandle, TransportSettings, Tunnel, TunnelError};

use super::fixtures::{
    EchoServer, GatewayOptions, Scratch, TEST_PASSWORD, TestGateway, nothing_listens, run,
    run_with, test_settings, tunnel_config,
};

/// A tunnel serving in the background
struct Serving {
    local: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<Result<ServeStats, TunnelError>>,
    _scratch: Scratch,
}

impl Serving {
    async fn start(transport: &TransportHandle, gateway: &TestGateway, destination: u16) -> Self {
        let scratch = Scratch::new();
        let config = tunnel_config(&scratch, gateway.port, AuthMethod::Password, destination)
            .with_password(SecretString::from(TEST_PASSWORD));

        let tunnel = within!("establish", Tunnel::establish(&config, transport))
            .expect("tunnel setup");
        let local = tunnel.local_addr();
        let token = CancellationToken::new();
        let task = tokio::spawn(tunnel.serve(token.clone()));

        Self {
            local,
            token,
            task,
            _scratch: scratch,
        }
    }

    async fn stop(self) -> ServeStats {
        self.token.cancel();
        within!("serve to return", self.task)
            .expect("serve task")
            .expect("serve result")
    }
}

async fn echo_round_trip(local: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut client = TcpStream::connect(local).await.expect("connect to tunnel");
    client.write_all(payload).await.expect("write");
    client.shutdown().await.expect("half-close");

    let mut received = Vec::new();
    within!("echo", client.read_to_end(&mut received)).expect("read echo");
    received
}

/// Test ten bytes travel to the destination and back, then the
/// connection is torn down at both ends
#[test]
fn test_echo_through_tunnel() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        let received = echo_round_trip(serving.local, b"0123456789").await;
        assert_eq!(received, b"0123456789");
        assert!(echo.wait_closed(1).await, "destination connection should close");

        let stats = serving.stop().await;
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.refused, 0);
    });
}

/// Test the response still arrives after the client stops sending
#[test]
fn test_half_close_keeps_response_flowing() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        let payload: Vec<u8> = (0..=255u8).cycle().take(256 * 1024).collect();
        let mut client = TcpStream::connect(serving.local).await.expect("connect");
        let (mut reader, mut writer) = client.split();

        let (written, received) = tokio::join!(
            async {
                writer.write_all(&payload).await?;
                writer.shutdown().await
            },
            async {
                let mut received = Vec::new();
                reader.read_to_end(&mut received).await.map(|_| received)
            }
        );
        written.expect("write and half-close");
        assert_eq!(received.expect("read"), payload);

        serving.stop().await;
    });
}

/// Test several clients at once each get their own bytes back
#[test]
fn test_concurrent_connections() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        let clients: Vec<_> = (0..5u8)
            .map(|i| {
                let local = serving.local;
                tokio::spawn(async move {
                    let payload = vec![i; 1024 * (usize::from(i) + 1)];
                    (echo_round_trip(local, &payload).await, payload)
                })
            })
            .collect();

        for client in clients {
            let (received, payload) = client.await.expect("client task");
            assert_eq!(received, payload);
        }

        let stats = serving.stop().await;
        assert_eq!(stats.accepted, 5);
    });
}

/// Test a refused channel closes only its own connection
#[test]
fn test_refused_channel_is_isolated() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password().refusing_first_forwards(1))
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        // The gateway refuses this one; the tunnel drops the local socket
        let mut refused = TcpStream::connect(serving.local).await.expect("connect");
        let mut buf = [0u8; 16];
        match within!("refused socket", refused.read(&mut buf)) {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("refused connection delivered {} bytes", n),
        }

        // The listener and session are still serving
        let received = echo_round_trip(serving.local, b"still up").await;
        assert_eq!(received, b"still up");

        let stats = serving.stop().await;
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.refused, 1);
        assert_eq!(gateway.counters.forwards.load(Ordering::SeqCst), 2);
    });
}

/// Test a destination the gateway cannot reach refuses the channel
#[test]
fn test_unreachable_destination() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let closed_port = super::fixtures::free_port();
        let serving = Serving::start(&transport, &gateway, closed_port).await;

        let mut client = TcpStream::connect(serving.local).await.expect("connect");
        let mut buf = [0u8; 16];
        match within!("dropped socket", client.read(&mut buf)) {
            Ok(0) | Err(_) => {}
            Ok(n) => panic!("unexpected {} bytes", n),
        }

        let stats = serving.stop().await;
        assert_eq!(stats.refused, 1);
    });
}

/// Test shutdown ends idle connections within the grace period and
/// releases the local port
#[test]
fn test_shutdown_is_bounded() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;
        let local = serving.local;

        // Open and prove the connection, then leave it idle
        let mut idle = TcpStream::connect(local).await.expect("connect");
        idle.write_all(b"ping").await.expect("write");
        let mut buf = [0u8; 4];
        within!("echo", idle.read_exact(&mut buf)).expect("read");
        assert_eq!(&buf, b"ping");

        let started = Instant::now();
        let stats = serving.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.accepted, 1);

        // The idle client sees its connection end
        let mut rest = Vec::new();
        // A reset is as good as an EOF here
        let _ = within!("idle close", idle.read_to_end(&mut rest));
        assert!(rest.is_empty());
        assert!(nothing_listens(local.port()).await, "listener must be released");
    });
}

/// Test a connection reset by its client ends alone: a live connection
/// keeps echoing and new connections are still accepted
#[test]
fn test_reset_connection_is_isolated() {
    run(|transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        let mut live = TcpStream::connect(serving.local).await.expect("connect live");
        live.write_all(b"one").await.expect("write");
        let mut buf = [0u8; 3];
        within!("live echo", live.read_exact(&mut buf)).expect("read");
        assert_eq!(&buf, b"one");

        let mut doomed = TcpStream::connect(serving.local).await.expect("connect doomed");
        doomed.write_all(b"two").await.expect("write");
        within!("doomed echo", doomed.read_exact(&mut buf)).expect("read");
        assert_eq!(&buf, b"two");

        // Zero linger turns the close into an RST
        doomed.set_linger(Some(Duration::ZERO)).expect("linger");
        drop(doomed);
        assert!(echo.wait_closed(1).await, "reset connection should be torn down");

        live.write_all(b"three").await.expect("write after reset");
        let mut buf = [0u8; 5];
        within!("live echo after reset", live.read_exact(&mut buf)).expect("read");
        assert_eq!(&buf, b"three");

        let received = echo_round_trip(serving.local, &[99]).await;
        assert_eq!(received, [99]);

        drop(live);
        let stats = serving.stop().await;
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.refused, 0);
    });
}

/// Test an idle tunnel survives past the inactivity timeout when
/// keepalives are disabled
#[test]
fn test_idle_without_keepalive_keeps_session() {
    let settings = TransportSettings {
        keepalive_interval: None,
        inactivity_timeout: Some(Duration::from_secs(1)),
        ..test_settings()
    };

    run_with(settings, |transport| async move {
        let gateway = TestGateway::start(GatewayOptions::password())
            .await
            .expect("gateway");
        let echo = EchoServer::start().await.expect("echo");
        let serving = Serving::start(&transport, &gateway, echo.port).await;

        tokio::time::sleep(Duration::from_secs(3)).await;

        let received = echo_round_trip(serving.local, b"hello").await;
        assert_eq!(received, b"hello");
        assert!(!serving.task.is_finished(), "tunnel should still be serving");

        let stats = serving.stop().await;
        assert_eq!(stats.accepted, 1);
    });
}
