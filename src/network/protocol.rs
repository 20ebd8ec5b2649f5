//! Node Protocol
//!
//! Messages exchanged between nodes over the transport.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::sync::PassReport;

/// Protocol messages for node communication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    // ========== Heartbeat ==========
    /// Liveness check
    Ping { node_id: String },

    /// Liveness answer
    Pong { node_id: String },

    // ========== Cluster actions ==========
    /// Run one scan pass now
    FlushRequest { origin: String },

    /// Scan pass finished
    FlushResponse { node_id: String, report: PassReport },

    /// Restart the file updater
    ResetSyncRequest { origin: String },

    /// File updater restarted
    ResetSyncResponse { node_id: String },

    // ========== Errors ==========
    /// The request failed on the receiving node
    Error { code: ErrorCode, message: String },
}

/// Error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Request was malformed or not understood
    InvalidRequest,
    /// The store could not be reached
    Unavailable,
    /// The node is shutting down
    ShuttingDown,
    /// Internal error
    Internal,
}

impl Message {
    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn deserialize(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Build the error reply for a failed request
    pub fn error(err: &Error) -> Self {
        let code = match err {
            Error::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Error::StoreUnavailable(_) => ErrorCode::Unavailable,
            Error::ShuttingDown | Error::Cancelled => ErrorCode::ShuttingDown,
            _ => ErrorCode::Internal,
        };
        Message::Error {
            code,
            message: err.to_string(),
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Ping { .. } => "Ping",
            Message::Pong { .. } => "Pong",
            Message::FlushRequest { .. } => "FlushRequest",
            Message::FlushResponse { .. } => "FlushResponse",
            Message::ResetSyncRequest { .. } => "ResetSyncRequest",
            Message::ResetSyncResponse { .. } => "ResetSyncResponse",
            Message::Error { .. } => "Error",
        }
    }
}

/// Frame header for length-prefixed messages
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    /// Message length
    pub length: u32,
    /// Message checksum
    pub checksum: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    /// Largest body a peer may send
    pub const MAX_LENGTH: u32 = 16 * 1024 * 1024;

    /// Create a new frame header
    pub fn new(data: &[u8]) -> Self {
        Self {
            length: data.len() as u32,
            checksum: crc32fast::hash(data),
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.length.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let [l0, l1, l2, l3, c0, c1, c2, c3] = *bytes;
        Self {
            length: u32::from_le_bytes([l0, l1, l2, l3]),
            checksum: u32::from_le_bytes([c0, c1, c2, c3]),
        }
    }
}
