//! Config Entry
//!
//! One path → content row of the shared store, plus the identifier codec
//! that keys rows by path.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Position of a write in the store's commit order. Starts at 1 and never
/// repeats, even after deletes.
pub type Sequence = i64;

/// Field name of the path in stored documents
pub const PATH: &str = "path";

/// Field name of the encoded content in stored documents
pub const CONTENT: &str = "content";

/// Field name of the write time in stored documents
pub const TIMESTAMP: &str = "@timestamp";

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Derive the store identifier of a path.
///
/// URL-safe base64 without padding over the UTF-8 bytes: injective, stable,
/// and safe to use as a primary key or in a URL.
pub fn encode_identifier(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Recover the path an identifier was derived from
pub fn decode_identifier(identifier: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD.decode(identifier)?;
    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidRequest(format!("identifier is not UTF-8: {}", e)))
}

/// Encode raw file content for embedding in a stored document
pub fn encode_content(content: &[u8]) -> String {
    STANDARD.encode(content)
}

/// A stored configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Logical, slash-separated relative path
    pub path: String,
    /// Whole-file content, base64 encoded as stored
    pub content: String,
    /// Last write time assigned by the store
    pub timestamp: Timestamp,
}

impl ConfigEntry {
    /// Build an entry from raw content
    pub fn new(path: impl Into<String>, content: &[u8], timestamp: Timestamp) -> Self {
        Self {
            path: path.into(),
            content: encode_content(content),
            timestamp,
        }
    }

    /// The store identifier of this entry
    pub fn identifier(&self) -> String {
        encode_identifier(&self.path)
    }

    /// Decode the embedded content
    pub fn decode_content(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.content.as_bytes())?)
    }

    /// The write time as a UTC date
    pub fn written_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.timestamp)
    }
}
