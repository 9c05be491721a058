//! lnetd daemon binary.
//!
//! Run with: cargo run -p lnetd-server --release

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lnetd_server::{shutdown_signal, LNetClient, LNetServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lnetd=info,lnetd_server=info,lnetd_protocol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Fixed wire values must hold before we talk to anyone.
    lnetd_protocol::assert_wire_compat();

    let config = ServerConfig::from_env();
    tracing::info!("Starting lnetd v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Bind address: {}", config.bind_address());
    if config.local_addrs.is_empty() {
        tracing::warn!(
            "no local addresses configured (LNETD_LOCAL_ADDRS); PING replies will carry an empty interface list"
        );
    }

    let server = LNetServer::new(LNetClient::from_config(&config));
    server
        .listen(&config.bind_address(), shutdown_signal())
        .await?;

    tracing::info!("lnetd stopped");
    Ok(())
}
