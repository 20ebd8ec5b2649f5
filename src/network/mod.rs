//! Network Module
//!
//! Handles TCP communication between nodes.

mod client;
pub mod protocol;
mod server;

pub use client::NetworkClient;
pub use protocol::{ErrorCode, FrameHeader, Message};
pub use server::{NetworkServer, RequestHandler};

use crate::error::{Error, Result};

/// Read a framed message from a reader
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    use tokio::io::AsyncReadExt;

    // Read header
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = FrameHeader::from_bytes(&header_bytes);

    if header.length > FrameHeader::MAX_LENGTH {
        return Err(Error::Network(format!("Frame too large: {} bytes", header.length)));
    }

    // Read body
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;

    // Verify checksum
    let computed_checksum = crc32fast::hash(&body);
    if computed_checksum != header.checksum {
        return Err(Error::Network("Message checksum mismatch".into()));
    }

    let message = Message::deserialize(&body)?;
    Ok(message)
}

/// Write a framed message to a writer
pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let body = message.serialize()?;
    let header = FrameHeader::new(&body);

    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_framed_roundtrip_over_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        let msg = Message::Ping {
            node_id: "node-1".to_string(),
        };

        write_message(&mut a, &msg).await.unwrap();
        assert_eq!(read_message(&mut b).await.unwrap(), msg);
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(1024);
        let body = Message::Ping {
            node_id: "node-1".to_string(),
        }
        .serialize()
        .unwrap();
        let mut header = FrameHeader::new(&body);
        header.checksum ^= 1;

        a.write_all(&header.to_bytes()).await.unwrap();
        a.write_all(&body).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::Network(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        use tokio::io::AsyncWriteExt;

        let (mut a, mut b) = tokio::io::duplex(64);
        let header = FrameHeader {
            length: FrameHeader::MAX_LENGTH + 1,
            checksum: 0,
        };
        a.write_all(&header.to_bytes()).await.unwrap();

        assert!(matches!(read_message(&mut b).await, Err(Error::Network(_))));
    }
}
