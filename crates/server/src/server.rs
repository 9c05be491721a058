//! The listening service.
//!
//! Binds a TCP socket and spawns one task per accepted connection. Tasks
//! never share per-connection state; the client carrying the shared
//! read-only state is handed out behind an `Arc`.

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::client::LNetClient;
use crate::error::ServerError;

/// Resolves on SIGINT or SIGTERM; the usual shutdown future for
/// [`LNetServer::listen`].
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub struct LNetServer {
    client: Arc<LNetClient>,
}

impl LNetServer {
    pub fn new(client: LNetClient) -> LNetServer {
        LNetServer {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &LNetClient {
        &self.client
    }

    /// Listen on `bind_addr` and dispatch valid connections to handler
    /// tasks until the shutdown future resolves.
    ///
    /// Shutdown is cooperative: the listener stops accepting and its socket
    /// closes when this returns; connection tasks observe stream closure on
    /// their next read. In-flight frames may be dropped mid-read.
    pub async fn listen<F>(&self, bind_addr: &str, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(bind_addr).await?;
        info!(addr = %listener.local_addr()?, "LNetServer listening");
        tokio::pin!(shutdown);

        loop {
            debug!("LNetServer waiting for connection");
            tokio::select! {
                _ = &mut shutdown => {
                    debug!("LNetServer listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "accept error");
                            return Err(e.into());
                        }
                    };
                    let client = Arc::clone(&self.client);
                    tokio::spawn(async move {
                        client.handle_connection(stream, &remote.to_string()).await;
                    });
                }
            }
        }
    }
}
