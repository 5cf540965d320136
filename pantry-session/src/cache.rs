//! TTL-bounded profile cache, one entry per subject
//!
//! Eviction is lazy: an expired entry is removed by the `get` that finds it.
//! Cardinality is one entry per signed-in subject, so there is no sweeper.

use crate::model::{Profile, SubjectId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub subject_id: SubjectId,
    pub profile: Profile,
    pub fetched_at: Instant,
}

pub struct ProfileCache {
    ttl: Duration,
    entries: Mutex<HashMap<SubjectId, CacheEntry>>,
}

impl ProfileCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached profile if younger than the TTL; stale entries are dropped
    pub fn get(&self, subject: &SubjectId) -> Option<Profile> {
        let mut entries = self.entries.lock();
        let entry = entries.get(subject)?;

        if entry.fetched_at.elapsed() <= self.ttl {
            tracing::debug!(subject = %subject, "Profile cache hit");
            return Some(entry.profile.clone());
        }

        tracing::debug!(subject = %subject, "Profile cache entry expired");
        entries.remove(subject);
        None
    }

    pub fn put(&self, subject: &SubjectId, profile: Profile) {
        self.entries.lock().insert(
            subject.clone(),
            CacheEntry {
                subject_id: subject.clone(),
                profile,
                fetched_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, subject: &SubjectId) {
        if self.entries.lock().remove(subject).is_some() {
            tracing::debug!(subject = %subject, "Profile cache entry invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
