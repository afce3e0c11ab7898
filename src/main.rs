//! rtugate - Modbus RTU gateway
//!
//! Accepts device connections over TCP and logs every RTU frame they send.

use clap::Parser;
use rtugate_protocol::{Framer, RtuFrame};
use rtugate_server::{Config, Server, ServerConfig, ServerError, Session};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rtugate")]
#[command(about = "Modbus RTU gateway for TCP-connected field devices")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "RTUGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log raw traffic as hex
    #[arg(long)]
    debug: bool,
}

/// Logs each frame received from a device until the first read error.
async fn log_frames(session: Arc<Session>) {
    loop {
        let bytes = match session.read().await {
            Ok(bytes) => bytes,
            Err(e) => {
                log_read_end(&session, &e);
                return;
            }
        };

        match RtuFrame::parse(&bytes) {
            Ok(frame) => match frame.exception() {
                Some(exception) => tracing::warn!(
                    "[{}] address={} function={:#04x} exception: {}",
                    session.remote_addr(),
                    frame.address,
                    frame.function,
                    exception
                ),
                None => tracing::info!(
                    "[{}] address={} function={:#04x} payload={}",
                    session.remote_addr(),
                    frame.address,
                    frame.function,
                    hex::encode(frame.data())
                ),
            },
            Err(e) => tracing::warn!(
                "[{}] dropped {} bytes: {}",
                session.remote_addr(),
                bytes.len(),
                e
            ),
        }
    }
}

fn log_read_end(session: &Session, err: &ServerError) {
    if err.is_offline() || err.is_timeout() {
        tracing::info!("[{}] session ended: {}", session.remote_addr(), err);
    } else {
        tracing::warn!("[{}] read failed: {}", session.remote_addr(), err);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    // File, then environment, then command line
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| {
        tracing::error!("Failed to load config: {}", e);
        e
    })?;
    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    if let Some(bind) = cli.bind {
        config.network.bind_addr = bind;
    }
    if cli.debug {
        config.session.debug = true;
    }
    config.validate()?;

    tracing::info!("Starting rtugate");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max read size: {} bytes", config.network.max_bytes);
    tracing::info!("  I/O timeout: {:?}", config.network.timeout());
    tracing::info!(
        "  Write quiescence: {:?}",
        config.session.write_quiescence()
    );
    tracing::info!("  Identity eviction: {:?}", config.session.eviction);

    let server = Arc::new(Server::new(ServerConfig::from(&config)));
    server.on_session_closed(|identity| {
        tracing::info!("Device disconnected: {}", identity.unwrap_or("<unidentified>"));
    });

    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    server.run(log_frames).await?;

    tracing::info!("Server stopped");
    Ok(())
}
