//! Progressive profile loader
//!
//! `load` hands back two things:
//! - `immediate`: an approximate profile synthesized from session claims,
//!   available synchronously, never fails
//! - `authoritative`: a future resolving to the stored profile, or `None`
//!
//! **Authoritative resolution:**
//! 1. Valid cache entry → return it (no network)
//! 2. Circuit open or backoff window still open → `None`
//! 3. Fetch from the store:
//!    - Found → write to cache, reset retry state, return it
//!    - NotFound → create once, then fetch once more (no second create)
//!    - Transient error / timeout → record attempt, `None`

use crate::cache::ProfileCache;
use crate::clients::{ProfileStore, StoreError};
use crate::config::ProfileDefaults;
use crate::error::with_timeout;
use crate::model::{Profile, Subject, SubjectId};
use crate::retry::RetryController;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Output of [`ProfileLoader::load`]
pub struct ProgressiveLoad {
    pub immediate: Profile,
    pub authoritative: BoxFuture<'static, Option<Profile>>,
}

pub struct ProfileLoader {
    store: Arc<dyn ProfileStore>,
    cache: Arc<ProfileCache>,
    retry: Arc<RetryController>,
    defaults: ProfileDefaults,
    fetch_timeout: Duration,
}

impl ProfileLoader {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        cache: Arc<ProfileCache>,
        retry: Arc<RetryController>,
        defaults: ProfileDefaults,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            retry,
            defaults,
            fetch_timeout,
        }
    }

    pub fn load(self: &Arc<Self>, subject: &Subject) -> ProgressiveLoad {
        ProgressiveLoad {
            immediate: self.approximate(subject),
            authoritative: self.load_authoritative(&subject.id),
        }
    }

    /// Owned future for the authoritative path, suitable for spawning
    pub fn load_authoritative(self: &Arc<Self>, id: &SubjectId) -> BoxFuture<'static, Option<Profile>> {
        let this = Arc::clone(self);
        let id = id.clone();
        async move { this.authoritative(&id).await }.boxed()
    }

    /// Stand-in profile built only from what the session already tells us
    pub fn approximate(&self, subject: &Subject) -> Profile {
        Profile {
            id: subject.id.clone(),
            username: synthesize_username(subject),
            full_name: non_blank(subject.display_name_hint.as_deref()),
            bio: None,
            avatar_url: non_blank(subject.avatar_hint.as_deref()),
            locale: self.defaults.locale.clone(),
            units: self.defaults.units,
            time_per_meal_minutes: self.defaults.time_per_meal_minutes,
            skill_level: self.defaults.skill_level,
            created_at: None,
            updated_at: None,
        }
    }

    pub async fn authoritative(&self, id: &SubjectId) -> Option<Profile> {
        if let Some(profile) = self.cache.get(id) {
            return Some(profile);
        }

        if !self.retry.should_retry(id) {
            debug!(subject = %id, "Profile circuit open, keeping current profile");
            return None;
        }
        if !self.retry.ready(id) {
            debug!(subject = %id, "Profile fetch still backing off");
            return None;
        }

        let mut created = false;
        loop {
            match self.fetch_once(id).await {
                Ok(profile) => {
                    self.cache.put(id, profile.clone());
                    self.retry.reset(id);
                    return Some(profile);
                }
                Err(StoreError::NotFound(_)) if !created => {
                    created = true;
                    if let Err(err) = self.create_once(id).await {
                        warn!(subject = %id, error = %err, "Default profile creation failed");
                        self.retry.record_attempt(id);
                        return None;
                    }
                    info!(subject = %id, "Created default profile, refetching");
                }
                Err(err) => {
                    warn!(subject = %id, error = %err, "Profile fetch failed");
                    self.retry.record_attempt(id);
                    return None;
                }
            }
        }
    }

    async fn fetch_once(&self, id: &SubjectId) -> Result<Profile, StoreError> {
        with_timeout("profile fetch", self.fetch_timeout, self.store.fetch_profile(id))
            .await
            .unwrap_or_else(|timeout| Err(StoreError::Transient(timeout.to_string())))
    }

    async fn create_once(&self, id: &SubjectId) -> Result<Profile, StoreError> {
        with_timeout("profile create", self.fetch_timeout, self.store.create_profile(id))
            .await
            .unwrap_or_else(|timeout| Err(StoreError::Transient(timeout.to_string())))
    }
}

/// Email local-part, else the display name as a handle, else an id-derived handle
fn synthesize_username(subject: &Subject) -> String {
    let from_email = subject
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty());
    if let Some(local) = from_email {
        return local.to_string();
    }

    if let Some(name) = non_blank(subject.display_name_hint.as_deref()) {
        return name
            .split_whitespace()
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join("_");
    }

    let prefix: String = subject.id.as_str().chars().take(8).collect();
    format!("chef_{}", prefix)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
