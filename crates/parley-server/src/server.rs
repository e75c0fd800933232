//! Listener setup and the accept loop.

use std::net::SocketAddr;

use parley_config::ServerConfig;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::presence::Coordinator;

/// Bind the configured address.
pub async fn bind(config: &ServerConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.bind_addr()).await
}

/// Accept connections forever. Each one gets its own task, so a failed
/// handshake or a panicking connection never stops the loop.
pub async fn serve(listener: TcpListener, coordinator: Coordinator) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, coordinator).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Bind and run the server in the background. Returns the bound address,
/// which matters when the configured port is `0`.
pub async fn spawn(
    config: &ServerConfig,
    coordinator: Coordinator,
) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = bind(config).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, mic_slots = config.mic_slots, "parley-server listening");
    let handle = tokio::spawn(serve(listener, coordinator));
    Ok((addr, handle))
}
