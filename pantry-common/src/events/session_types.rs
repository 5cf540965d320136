//! Session-related types carried inside PantryEvent

use serde::{Deserialize, Serialize};

/// Externally visible phase of the session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Nothing has been attempted yet
    Uninitialized,
    /// Session lookup in flight
    Initializing,
    /// A subject is signed in (profile may still be approximate)
    Authenticated,
    /// No subject: never signed in, signed out, or initialization timed out
    Anonymous,
}

/// Where the currently published profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileSource {
    /// Synthesized locally from session claims, never persisted
    Approximate,
    /// Read from the profile store (directly or via cache)
    Authoritative,
}
