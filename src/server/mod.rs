//! HTTP server for Local Uploadr
//!
//! Accepts uploads over HTTP/1.1 and hands them to the ingestion core.
//!
//! # Architecture
//!
//! The server is built on `hyper` and `tokio`:
//! - One task per connection
//! - Upload routes from configuration, plus `/health` and an upload form at `/`
//! - Optional admission limit on concurrent uploads
//! - Optional standalone Prometheus listener
//!
//! # Example
//!
//! ```no_run
//! use local_uploadr::config::Config;
//! use local_uploadr::server::UploadServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_yaml_str("server:\n  address: \"127.0.0.1:0\"\n")?;
//! let server = UploadServer::new(config).await?;
//! println!("listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

mod handlers;

use crate::config::Config;
use crate::ingest;
use handlers::AppState;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

#[cfg(feature = "metrics")]
use crate::metrics::server::{MetricsServer, MetricsServerConfig};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Failed to prepare storage: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP upload server
///
/// Binds on construction, so the bound address is known before [`run`](Self::run).
pub struct UploadServer {
    state: Arc<AppState>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl UploadServer {
    /// Prepare the storage root and bind the configured address.
    ///
    /// Port 0 lets the OS choose a port; see [`local_addr`](Self::local_addr).
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        ingest::prepare_storage(&config.storage).await?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(AppState::new(config)),
            listener,
            local_addr,
        })
    }

    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Serve until `shutdown` completes.
    ///
    /// Stops accepting connections on shutdown; connections already accepted
    /// run to completion on their own tasks.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        #[cfg(feature = "metrics")]
        let mut metrics_server = self.start_metrics().await?;

        info!(
            address = %self.local_addr,
            routes = self.state.config.routes.len(),
            "Starting upload server"
        );

        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handlers::handle_request(req, state).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }

        info!("Shutting down upload server");

        #[cfg(feature = "metrics")]
        if let Some(server) = metrics_server.as_mut() {
            server.shutdown().await;
        }

        Ok(())
    }

    #[cfg(feature = "metrics")]
    async fn start_metrics(&self) -> Result<Option<MetricsServer>, ServerError> {
        let metrics = &self.state.config.metrics;
        if !metrics.enabled {
            return Ok(None);
        }

        let address = SocketAddr::new(self.local_addr.ip(), metrics.port);
        let mut server = MetricsServer::new(MetricsServerConfig { address });
        server
            .start()
            .await
            .map_err(|e| ServerError::BindError(format!("Metrics listener on {}: {}", address, e)))?;
        Ok(Some(server))
    }
}
