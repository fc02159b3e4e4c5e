//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use super::gate::RateLimitGate;
use super::service::router;
use crate::error::Result;

/// HTTP server exposing the gated endpoints.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The gate deciding every request
    gate: Arc<RateLimitGate>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, gate: Arc<RateLimitGate>) -> Self {
        Self { addr, gate }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;

        info!(
            addr = %listener.local_addr()?,
            algorithm = %self.gate.algorithm(),
            "Starting HTTP server"
        );

        axum::serve(listener, router(self.gate))
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                e
            })?;

        Ok(())
    }
}
