//! HTTP interface for Banter.
//!
//! Exposes the chat service over a small JSON API plus an SSE stream for
//! following a job's output live.

mod routes;

pub use routes::router;

use banter_core::ChatService;
use log::info;
use std::future::Future;
use thiserror::Error;
use tokio::net::TcpListener;

/// Errors returned while running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serve the API on `addr` until `shutdown` resolves.
///
/// In-flight requests are drained before this returns.
pub async fn serve(
    addr: &str,
    service: ChatService,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("http server listening (addr={local_addr})");

    let app = router(service);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("http server stopped");
    Ok(())
}
