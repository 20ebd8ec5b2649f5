//! Network Client
//!
//! TCP client for sending requests to other nodes.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{read_message, write_message, Message};
use crate::error::{Error, Result};

/// Network client for connecting to peer nodes.
///
/// Each request opens its own connection; cluster actions are rare and
/// sequential.
pub struct NetworkClient {
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
}

impl NetworkClient {
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            request_timeout,
        }
    }

    /// One request, one response, one connection
    pub async fn send(&self, address: &str, message: Message) -> Result<Message> {
        self.send_with_timeout(address, message, self.request_timeout)
            .await
    }

    /// Send with an explicit request timeout
    pub async fn send_with_timeout(
        &self,
        address: &str,
        message: Message,
        request_timeout: Duration,
    ) -> Result<Message> {
        let result = timeout(request_timeout, self.send_inner(address, message)).await;

        match result {
            Ok(inner_result) => inner_result,
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }

    async fn send_inner(&self, address: &str, message: Message) -> Result<Message> {
        let stream = self.connect(address).await?;
        let (mut reader, mut writer) = stream.into_split();

        tracing::trace!("Sending {} to {}", message.type_name(), address);
        write_message(&mut writer, &message).await?;
        read_message(&mut reader).await
    }

    /// Open a fresh connection, bounded by the connect timeout
    async fn connect(&self, address: &str) -> Result<TcpStream> {
        let result = timeout(self.connect_timeout, TcpStream::connect(address)).await;

        match result {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            Ok(Err(e)) => Err(Error::ConnectionFailed {
                address: address.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(Error::ConnectionTimeout(address.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_failure() {
        // Grab a free port, then close it so nothing is listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = NetworkClient::new(Duration::from_millis(200), Duration::from_millis(500));
        let result = client
            .send(&address, Message::Ping { node_id: "node-1".to_string() })
            .await;
        assert!(matches!(
            result,
            Err(Error::ConnectionFailed { .. }) | Err(Error::ConnectionTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        // Accept and never answer
        let _accepting = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = NetworkClient::new(Duration::from_millis(500), Duration::from_millis(200));
        let result = client
            .send(&address, Message::Ping { node_id: "node-1".to_string() })
            .await;
        assert!(matches!(result, Err(Error::ConnectionTimeout(_))));
    }
}
