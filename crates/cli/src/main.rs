//! lnetctl: control tool for the userland LNet acceptor.
//!
//! # Usage
//!
//! ```bash
//! # Serve LNet connections on the default acceptor port
//! lnetctl serve
//!
//! # Serve on an unprivileged port, advertising one local address
//! lnetctl serve --port 9881 --local-addr 192.168.1.7
//!
//! # Check connectivity to a peer
//! lnetctl remote-ping 192.168.105.12@tcp0#9881
//! ```

use std::net::IpAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lnetd_protocol::Nid;
use lnetd_server::{shutdown_signal, LNetClient, LNetServer, ServerConfig};

#[derive(Parser)]
#[command(name = "lnetctl")]
#[command(version)]
#[command(about = "Userland LNet acceptor control tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the acceptor socket and serve LNet connections
    Serve {
        /// TCP port to listen on (988 needs privilege; any port works for
        /// peers that honor the #PORT NID suffix)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Local address advertised in PING replies (repeatable)
        #[arg(long = "local-addr")]
        local_addrs: Vec<IpAddr>,
    },

    /// Ping a remote service to check connectivity
    ///
    /// Unlike lnetctl ping on a Lustre node, this does not require binding
    /// a privileged port and accepts a #PORT NID suffix.
    RemotePing {
        /// The remote NID, e.g. 192.168.105.12@tcp0#9881
        nid: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lnetctl=info,lnetd_server=info,lnetd_protocol=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    lnetd_protocol::assert_wire_compat();

    match Cli::parse().command {
        Commands::Serve {
            port,
            bind,
            local_addrs,
        } => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if !local_addrs.is_empty() {
                config.local_addrs = local_addrs;
            }
            let server = LNetServer::new(LNetClient::from_config(&config));
            server
                .listen(&config.bind_address(), shutdown_signal())
                .await?;
        }
        Commands::RemotePing { nid } => {
            let nid: Nid = nid.parse()?;
            anyhow::ensure!(!nid.is_any(), "cannot ping 'any' NID");
            // TODO: drive the client side of the acceptor + HELLO exchange
            // and send the PING GET; only local parsing is wired up so far.
            tracing::info!(%nid, port = nid.port(), "pinging remote service");
        }
    }
    Ok(())
}
