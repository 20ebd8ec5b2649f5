//! Network Server
//!
//! TCP server answering requests from other nodes.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use super::{read_message, write_message, ErrorCode, Message};
use crate::cluster::{ClusterMembership, NodeActions};
use crate::error::{Error, Result};

/// Answers node requests by running them against the local node
pub struct RequestHandler {
    node_id: String,
    actions: Arc<dyn NodeActions>,
    cluster: Arc<ClusterMembership>,
}

impl RequestHandler {
    pub fn new(
        node_id: String,
        actions: Arc<dyn NodeActions>,
        cluster: Arc<ClusterMembership>,
    ) -> Self {
        Self {
            node_id,
            actions,
            cluster,
        }
    }

    /// Produce the reply to one request
    pub async fn handle(&self, message: Message) -> Message {
        match message {
            Message::Ping { node_id } => {
                self.cluster.record_heartbeat(&node_id).await;
                Message::Pong {
                    node_id: self.node_id.clone(),
                }
            }
            Message::FlushRequest { origin } => {
                tracing::debug!("Flush requested by {}", origin);
                match self.actions.flush_local().await {
                    Ok(report) => Message::FlushResponse {
                        node_id: self.node_id.clone(),
                        report,
                    },
                    Err(e) => {
                        tracing::warn!("Flush requested by {} failed: {}", origin, e);
                        Message::error(&e)
                    }
                }
            }
            Message::ResetSyncRequest { origin } => {
                tracing::debug!("Reset requested by {}", origin);
                match self.actions.reset_local().await {
                    Ok(()) => Message::ResetSyncResponse {
                        node_id: self.node_id.clone(),
                    },
                    Err(e) => {
                        tracing::warn!("Reset requested by {} failed: {}", origin, e);
                        Message::error(&e)
                    }
                }
            }
            other => Message::Error {
                code: ErrorCode::InvalidRequest,
                message: format!("unexpected message {}", other.type_name()),
            },
        }
    }
}

/// Network server for cluster communication
pub struct NetworkServer {
    /// Bound listener
    listener: TcpListener,
    /// Shutdown signal
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl NetworkServer {
    /// Bind the server. Nothing is accepted until `serve` runs.
    pub async fn bind(bind_address: &str) -> Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Ok(Self { listener, shutdown })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until stopped
    pub async fn serve(&self, handler: Arc<RequestHandler>) -> Result<()> {
        tracing::info!("Network server listening on {}", self.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, addr)) => {
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, addr, handler).await {
                                    tracing::warn!("Connection error from {}: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Network server stopped");
        Ok(())
    }

    /// Stop the server
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Serve requests on one connection until the peer hangs up
async fn handle_connection(
    socket: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<RequestHandler>,
) -> Result<()> {
    socket.set_nodelay(true)?;
    let (mut reader, mut writer) = socket.into_split();

    loop {
        match read_message(&mut reader).await {
            Ok(message) => {
                tracing::trace!("Received {} from {}", message.type_name(), peer_addr);
                let response = handler.handle(message).await;
                write_message(&mut writer, &response).await?;
            }
            Err(Error::Io(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Connection closed
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(())
}
