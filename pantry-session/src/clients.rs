//! Collaborator contracts: identity backend and profile store
//!
//! The engine only talks to the outside world through these two traits.
//! Implementations live in the host application (or in test fakes).

use crate::model::{Profile, Subject, SubjectId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;

/// Session object returned by the identity backend
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub subject: Subject,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Authentication state change kinds pushed by the identity backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Authentication state change notification
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    /// Present for `SignedIn` and `TokenRefreshed`
    pub session: Option<Session>,
}

impl AuthEvent {
    pub fn signed_in(session: Session) -> Self {
        Self {
            kind: AuthEventKind::SignedIn,
            session: Some(session),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }

    pub fn token_refreshed(session: Session) -> Self {
        Self {
            kind: AuthEventKind::TokenRefreshed,
            session: Some(session),
        }
    }
}

/// Identity backend client
///
/// Errors are opaque vendor errors; the engine converts them at the boundary.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Current session, or `None` when nobody is signed in
    async fn get_session(&self) -> anyhow::Result<Option<Session>>;

    /// Subscribe to auth state changes
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Revoke the remote session
    async fn sign_out(&self) -> anyhow::Result<()>;
}

/// Profile store failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No profile row exists for the subject
    #[error("Profile not found: {0}")]
    NotFound(SubjectId),

    /// Network failure, 5xx, or similar; worth retrying later
    #[error("Transient profile store error: {0}")]
    Transient(String),
}

/// Profile store client
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch_profile(&self, id: &SubjectId) -> Result<Profile, StoreError>;

    /// Create a default profile row for `id`
    async fn create_profile(&self, id: &SubjectId) -> Result<Profile, StoreError>;
}
