//! Published session state
//!
//! Observers read the whole `{user, profile, loading, error}` tuple at once;
//! every transition replaces the snapshot on a `watch` channel.

use crate::model::{CurrentProfile, Subject, SubjectId};
use pantry_common::events::SessionPhase;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user: Option<Subject>,
    pub profile: Option<CurrentProfile>,
    /// True while a session lookup or a user-visible profile load is pending
    pub loading: bool,
    /// Only set for conditions the user can act on
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn uninitialized() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            user: None,
            profile: None,
            loading: false,
            error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub fn subject_id(&self) -> Option<&SubjectId> {
        self.user.as_ref().map(|u| &u.id)
    }

    pub fn has_authoritative_profile(&self) -> bool {
        self.profile
            .as_ref()
            .is_some_and(CurrentProfile::is_authoritative)
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::uninitialized()
    }
}
