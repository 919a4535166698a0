//! Error types for the buffer server.

use crate::types::SessionHandle;
use std::time::Duration;
use thiserror::Error;

/// Main error type for buffer operations.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Invalid channel set: {0}")]
    InvalidChannelSet(String),

    #[error("Storage unavailable for {identifier:?}: {reason}")]
    StorageUnavailable { identifier: String, reason: String },

    #[error("Shape mismatch: expected {expected} channels, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    #[error("Invalid range [{start}, {end:?}) for {count} records")]
    RangeError {
        start: usize,
        end: Option<usize>,
        count: usize,
    },

    #[error("Unknown session: {0}")]
    UnknownSession(SessionHandle),

    #[error("Session closed: {0}")]
    SessionClosed(SessionHandle),

    #[error("Timed out after {0:?} waiting for session worker")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unexpected worker response: {0}")]
    UnexpectedResponse(String),
}

impl BufferError {
    /// Whether this error leaves the owning store in an unknown state.
    ///
    /// A worker that hits a fatal error stops serving its session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BufferError::Io(_)
                | BufferError::Corruption(_)
                | BufferError::InvalidFormat(_)
                | BufferError::ChecksumMismatch { .. }
                | BufferError::Serialization(_)
                | BufferError::Deserialization(_)
        )
    }

    pub(crate) fn storage(identifier: impl Into<String>, reason: impl ToString) -> Self {
        BufferError::StorageUnavailable {
            identifier: identifier.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rmp_serde::encode::Error> for BufferError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BufferError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BufferError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BufferError::Deserialization(e.to_string())
    }
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;
