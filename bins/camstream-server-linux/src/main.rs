use std::net::SocketAddr;

use anyhow::Context;
use camstream_core::{ConnectionManager, DeviceConfig, FixedBackoff};
use camstream_server::{ClipSource, ServerConfig, StreamServer, TcpBindLink};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,camstream_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("camstream server starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CAMSTREAM_CONFIG").ok());
    let config = load_config(config_path.as_deref())?;
    let credentials = config.credentials()?;

    let frames_dir = config
        .stream
        .frames_dir
        .clone()
        .context("stream.framesDir must point at a directory of JPEG files")?;
    let source = ClipSource::from_dir(&frames_dir)?.with_interval(config.stream.frame_interval());

    // Bring the listening socket up through the same retry loop the device
    // uses for WiFi, off the async runtime since it blocks.
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.stream.port));
    let backoff = FixedBackoff::new(config.connection.backoff());
    let (mut manager, connection) = tokio::task::spawn_blocking(move || {
        let mut manager = ConnectionManager::new(TcpBindLink::new(bind_addr)).with_backoff(backoff);
        let connection = manager.connect(&credentials);
        (manager, connection)
    })
    .await?;

    let listener = manager
        .link_mut()
        .take_listener()
        .context("listener missing after bind")?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let server_config = ServerConfig {
        bind_addr,
        route: config.stream.route.clone(),
    };
    let server = StreamServer::new(server_config, source, manager.status());

    match connection.address {
        Some(ip) => tracing::info!("Camera stream ready! Go to: {}", config.stream.url_for(ip)),
        None => tracing::info!("Camera stream ready on port {}{}", config.stream.port, config.stream.route),
    }

    server
        .serve(listener, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C, shutting down...");
        })
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load the configuration file named by the first argument or `CAMSTREAM_CONFIG`.
///
/// The host needs a frames directory and credentials, which have no usable
/// defaults, so a configuration file is required.
fn load_config(path: Option<&str>) -> anyhow::Result<DeviceConfig> {
    let path = path.context(
        "no configuration file given (usage: camstream-server <config.json>, or set CAMSTREAM_CONFIG)",
    )?;
    tracing::info!("Loading configuration from {}", path);
    DeviceConfig::load(path).with_context(|| format!("failed to load {}", path))
}
