//! # Pantry Session Engine (pantry-session)
//!
//! Establishes who the current user is, keeps their profile in sync, and
//! publishes a single `{user, profile, loading, error}` snapshot to observers.
//!
//! **Components (leaves first):**
//! - `retry`: per-subject backoff and circuit breaker
//! - `cache`: TTL-bounded profile cache
//! - `coordinator`: at-most-one in-flight initialization with debounce
//! - `loader`: immediate approximate profile + authoritative fetch
//! - `manager`: the session state machine composing all of the above
//!
//! The identity backend and the profile store are reached only through the
//! traits in `clients`.

pub mod cache;
pub mod clients;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod loader;
pub mod manager;
pub mod model;
pub mod retry;
pub mod state;

pub use clients::{AuthEvent, AuthEventKind, IdentityBackend, ProfileStore, Session, StoreError};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use manager::SessionManager;
pub use model::{CurrentProfile, Profile, SkillLevel, Subject, SubjectId, Units};
pub use state::SessionSnapshot;
