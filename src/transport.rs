//! Process-wide transport bootstrap.
//!
//! Owns the async socket runtime and the SSH client configuration shared by
//! every connection of the tunnel. Components receive a [`TransportHandle`]
//! instead of reaching for ambient global state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use russh::client::Config;
use tokio::runtime::{Builder, Runtime};

use crate::config::TunnelConfig;
use crate::error::TunnelError;

/// Settings consumed once at bootstrap
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Worker threads for the runtime; `None` uses one per core
    pub worker_threads: Option<usize>,
    pub connect_timeout: Duration,
    /// `None` disables SSH keepalives
    pub keepalive_interval: Option<Duration>,
    /// Only applied while keepalives are enabled
    pub inactivity_timeout: Option<Duration>,
    /// How long `shutdown` waits for runtime tasks
    pub shutdown_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            worker_threads: None,
            connect_timeout: Duration::from_secs(30),
            keepalive_interval: Some(Duration::from_secs(60)),
            inactivity_timeout: Some(Duration::from_secs(3600)),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl TransportSettings {
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            keepalive_interval: config.keepalive_interval,
            shutdown_timeout: config.shutdown_grace,
            ..Self::default()
        }
    }
}

struct TransportInner {
    runtime: tokio::runtime::Handle,
    ssh_config: Arc<Config>,
    connect_timeout: Duration,
}

/// Capability proving the transport was initialized
#[derive(Clone)]
pub struct TransportHandle {
    inner: Arc<TransportInner>,
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("connect_timeout", &self.inner.connect_timeout)
            .field("ssh_config", &"<config>")
            .finish()
    }
}

impl TransportHandle {
    /// SSH client configuration shared by every session
    pub fn ssh_config(&self) -> Arc<Config> {
        self.inner.ssh_config.clone()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.inner.connect_timeout
    }

    /// Enter the transport runtime so sockets register with its reactor
    pub fn enter(&self) -> tokio::runtime::EnterGuard<'_> {
        self.inner.runtime.enter()
    }
}

/// The process-scoped runtime and SSH library configuration
pub struct Transport {
    runtime: Runtime,
    handle: TransportHandle,
    shutdown_timeout: Duration,
}

impl Transport {
    /// Bring up the runtime and SSH configuration. Must succeed before any
    /// socket or session is created; callers abort startup on error.
    pub fn initialize(settings: TransportSettings) -> Result<Self, TunnelError> {
        let mut builder = Builder::new_multi_thread();
        builder.enable_all().thread_name("sshfwd-worker");

        if let Some(threads) = settings.worker_threads {
            if threads == 0 {
                return Err(TunnelError::Bootstrap(
                    "worker thread count must be at least 1".to_string(),
                ));
            }
            builder.worker_threads(threads);
        }

        let runtime = builder
            .build()
            .map_err(|e| TunnelError::Bootstrap(format!("cannot start runtime: {}", e)))?;

        // Without keepalives an idle tunnel would time out its own session
        let inactivity_timeout = settings
            .keepalive_interval
            .and(settings.inactivity_timeout);

        let ssh_config = Config {
            inactivity_timeout,
            keepalive_interval: settings.keepalive_interval,
            keepalive_max: 3,
            ..Default::default()
        };

        tracing::debug!(
            keepalive = ?settings.keepalive_interval,
            connect_timeout = ?settings.connect_timeout,
            "Transport initialized"
        );

        let runtime_handle = runtime.handle().clone();
        Ok(Self {
            runtime,
            handle: TransportHandle {
                inner: Arc::new(TransportInner {
                    runtime: runtime_handle,
                    ssh_config: Arc::new(ssh_config),
                    connect_timeout: settings.connect_timeout,
                }),
            },
            shutdown_timeout: settings.shutdown_timeout,
        })
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Drive a future to completion on the transport runtime
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Release the runtime, waiting a bounded time for outstanding tasks.
    /// Consumes the transport so it can only run once.
    pub fn shutdown(self) {
        tracing::debug!("Transport shutting down");
        self.runtime.shutdown_timeout(self.shutdown_timeout);
    }
}
