//! Error types for the metadata cache
//!
//! This module defines the common error type used by the cache, its
//! collaborators and the setup calls.

use thiserror::Error;

/// Common result type for metadata cache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the metadata cache
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Collaborator errors
    #[error("connection to metadata server {server} failed: {reason}")]
    Connection { server: String, reason: String },

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("request timeout")]
    Timeout,

    // Setup errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("metadata cache already initialized")]
    AlreadyInitialized,

    #[error("metadata cache not initialized")]
    NotInitialized,

    #[error("invalid state: {0}")]
    InvalidState(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a connection error for the given server
    pub fn connection(server: impl ToString, reason: impl Into<String>) -> Self {
        Self::Connection {
            server: server.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a metadata content error
    pub fn metadata(msg: impl Into<String>) -> Self {
        Self::Metadata(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Connection-class failure: the next metadata server should be tried
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }

    /// Metadata-content-class failure: the refresh pass is abandoned
    #[must_use]
    pub const fn is_metadata(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.is_connection()
    }
}
