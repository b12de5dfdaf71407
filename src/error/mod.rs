// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// A structured error reported by a cluster node in the response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// HTTP status code the node reported.
    pub status: u16,
    /// Human-readable reason extracted from the error payload.
    pub reason: String,
}

impl ServerError {
    /// Build a server error from a bare status code, without payload detail.
    #[must_use]
    pub fn from_status(status: http::StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or("unknown status")
                .to_string(),
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status, self.reason)
    }
}

/// One failed attempt in a logical call's history.
#[derive(Debug)]
pub struct AttemptFailure {
    /// The node the attempt was made against.
    pub node: Url,
    /// What went wrong on this attempt.
    pub error: TransportError,
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error {0}")]
    Server(ServerError),

    #[error("Failed to deserialize response body: {0}")]
    Deserialization(String),

    #[error("Response body read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Maximum retries exceeded after {} failed attempts", attempts.len())]
    RetriesExhausted {
        /// Every failure seen across the call, in attempt order.
        attempts: Vec<AttemptFailure>,
    },

    #[error("No nodes available in the pool")]
    NoNodes,
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Deserialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
