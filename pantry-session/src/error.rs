//! Error types for pantry-session
//!
//! Nothing in here ever escapes `SessionManager::sign_out` or
//! `SessionManager::refresh_profile`; these errors travel between the
//! engine's internal layers and end up logged or folded into published state.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Convenience Result type using the session Error
pub type Result<T> = std::result::Result<T, SessionError>;

/// Main error type for the session engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A suspending call did not finish in time
    #[error("{operation} timed out after {after_ms} ms")]
    Timeout {
        operation: &'static str,
        after_ms: u64,
    },

    /// Identity backend failure (session lookup, sign-out)
    #[error("Identity backend error: {0}")]
    Identity(String),

    /// Profile store failure that survived local recovery
    #[error("Profile store error: {0}")]
    ProfileStore(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Background task panicked or was torn down with the runtime
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// True for timeouts, which initialization treats as "no session"
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout { .. })
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Identity(format!("{:#}", err))
    }
}

impl From<pantry_common::Error> for SessionError {
    fn from(err: pantry_common::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

/// Race `future` against `limit`, turning an elapsed deadline into a value
pub async fn with_timeout<T, F>(operation: &'static str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| SessionError::Timeout {
            operation,
            after_ms: limit.as_millis() as u64,
        })
}
