use std::time::Duration;
use thiserror::Error;

/// Central error type for the stem-separator-core crate.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    // Model resolution and download
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    // Separation call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chunk request {request_id} failed: {reason}")]
    ChunkCompute { request_id: u64, reason: String },

    #[error("Chunk request {request_id} timed out after {after:?}")]
    Timeout { request_id: u64, after: Duration },

    #[error("Backend returned silence for every stem of hop {hop}")]
    SilentOutput { hop: usize },

    #[error("Separation cancelled")]
    Cancelled,

    #[error("Compute context is gone")]
    ChannelClosed,
}

impl StemError {
    /// Cancellation is the only per-hop failure that must abort the whole call.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StemError::Cancelled)
    }
}

// --- Implement From conversions for common errors ---
impl From<std::io::Error> for StemError {
    fn from(e: std::io::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for StemError {
    fn from(e: reqwest::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for StemError {
    fn from(e: hex::FromHexError) -> Self {
        StemError::Anyhow(e.into())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
