use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use sshfwd::cli::Cli;
use sshfwd::config::paths;
use sshfwd::{Transport, TransportSettings, Tunnel, TunnelConfig};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = cli.load_config();

    // Initialize logging with file output.
    let log_dir = config
        .as_ref()
        .ok()
        .and_then(|c| c.log_dir.clone())
        .or_else(paths::log_dir)
        .and_then(|dir| paths::ensure_log_dir(&dir).ok());
    let _guard = sshfwd::logging::init_logging(log_dir.clone());

    tracing::info!("Starting sshfwd {}", env!("CARGO_PKG_VERSION"));
    if let Some(dir) = &log_dir {
        tracing::info!("Logging to {}", dir.display());
    }

    let result = config
        .context("Failed to load tunnel configuration")
        .and_then(run);

    match result {
        Ok(()) => {
            tracing::info!("sshfwd stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: TunnelConfig) -> Result<()> {
    let transport = Transport::initialize(TransportSettings::from_config(&config))
        .context("Failed to initialize transport")?;
    let handle = transport.handle();

    let result = transport.block_on(async {
        let tunnel = Tunnel::establish(&config, &handle)
            .await
            .context("Failed to establish tunnel")?;

        let shutdown = CancellationToken::new();
        tokio::spawn(cancel_on_signal(shutdown.clone()));

        let stats = tunnel.serve(shutdown).await.context("Tunnel failed")?;
        tracing::debug!(?stats, "Serve loop finished");
        Ok::<(), anyhow::Error>(())
    });

    transport.shutdown();
    result
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down..."),
                    _ = terminate.recv() => tracing::info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!("Cannot listen for Ctrl+C: {}", e);
                    return;
                }
                tracing::info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Received Ctrl+C, shutting down...");
    }

    token.cancel();
}
