//! Test helpers for pantry-session integration tests
//!
//! - FakeIdentity: scripted session lookup plus a broadcast auth event stream
//! - FakeProfileStore: in-memory profile table with scripted failures,
//!   programmable latency, and call counters

#![allow(dead_code)]

use async_trait::async_trait;
use pantry_session::config::SessionConfig;
use pantry_session::{
    AuthEvent, IdentityBackend, Profile, ProfileStore, Session, SessionManager, SessionSnapshot,
    SkillLevel, StoreError, Subject, SubjectId, Units,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const WAIT_LIMIT: Duration = Duration::from_secs(600);

// ========================================
// Identity backend
// ========================================

pub struct FakeIdentity {
    session: Mutex<Option<Session>>,
    lookup_delay: Mutex<Duration>,
    lookup_error: Mutex<Option<String>>,
    sign_out_error: Mutex<Option<String>>,
    tx: broadcast::Sender<AuthEvent>,
    pub get_session_calls: AtomicUsize,
    pub sign_out_calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn signed_out() -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Self {
            session: Mutex::new(None),
            lookup_delay: Mutex::new(Duration::ZERO),
            lookup_error: Mutex::new(None),
            sign_out_error: Mutex::new(None),
            tx,
            get_session_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        })
    }

    pub fn signed_in(subject_id: &str) -> Arc<Self> {
        let identity = Self::signed_out();
        identity.set_session(Some(session(subject_id)));
        identity
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock() = session;
    }

    pub fn set_lookup_delay(&self, delay: Duration) {
        *self.lookup_delay.lock() = delay;
    }

    pub fn fail_lookup(&self, message: &str) {
        *self.lookup_error.lock() = Some(message.to_string());
    }

    pub fn fail_sign_out(&self, message: &str) {
        *self.sign_out_error.lock() = Some(message.to_string());
    }

    /// Push an auth event to every subscriber
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn lookups(&self) -> usize {
        self.get_session_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityBackend for FakeIdentity {
    async fn get_session(&self) -> anyhow::Result<Option<Session>> {
        self.get_session_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.lookup_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.lookup_error.lock().clone() {
            anyhow::bail!(message);
        }
        Ok(self.session.lock().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    async fn sign_out(&self) -> anyhow::Result<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.sign_out_error.lock().clone() {
            anyhow::bail!(message);
        }
        self.set_session(None);
        Ok(())
    }
}

// ========================================
// Profile store
// ========================================

/// One scripted answer for `fetch_profile`, consumed before falling back to the table
#[derive(Debug, Clone)]
pub enum FetchScript {
    Transient,
    NotFound,
    /// Never answers; the loader's timeout has to fire
    Hang,
}

#[derive(Default)]
pub struct FakeProfileStore {
    profiles: Mutex<HashMap<SubjectId, Profile>>,
    script: Mutex<VecDeque<FetchScript>>,
    fetch_delay: Mutex<Duration>,
    fail_create: Mutex<bool>,
    unavailable: Mutex<HashSet<SubjectId>>,
    pub fetch_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
}

impl FakeProfileStore {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_profile(profile: Profile) -> Arc<Self> {
        let store = Self::empty();
        store.insert(profile);
        store
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.lock().insert(profile.id.clone(), profile);
    }

    pub fn script(&self, answers: impl IntoIterator<Item = FetchScript>) {
        self.script.lock().extend(answers);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn fail_create(&self) {
        *self.fail_create.lock() = true;
    }

    /// Every fetch for `id` fails transiently
    pub fn make_unavailable(&self, id: &str) {
        self.unavailable.lock().insert(SubjectId::new(id));
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FakeProfileStore {
    async fn fetch_profile(&self, id: &SubjectId) -> Result<Profile, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.lock().contains(id) {
            return Err(StoreError::Transient(format!("{} unavailable", id)));
        }

        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(FetchScript::Transient) => Err(StoreError::Transient("503 Service Unavailable".into())),
            Some(FetchScript::NotFound) => Err(StoreError::NotFound(id.clone())),
            Some(FetchScript::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(StoreError::Transient("hung".into()))
            }
            None => self
                .profiles
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(id.clone())),
        }
    }

    async fn create_profile(&self, id: &SubjectId) -> Result<Profile, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_create.lock() {
            return Err(StoreError::Transient("insert failed".into()));
        }
        let created = profile(id.as_str(), &format!("cook_{}", id));
        self.insert(created.clone());
        Ok(created)
    }
}

// ========================================
// Builders and waiting
// ========================================

pub fn session(subject_id: &str) -> Session {
    Session {
        subject: Subject::new(subject_id).with_email(format!("{}@example.com", subject_id)),
        access_token: format!("token-{}", subject_id),
        expires_at: None,
    }
}

pub fn profile(id: &str, username: &str) -> Profile {
    Profile {
        id: SubjectId::new(id),
        username: username.to_string(),
        full_name: Some("Stored Name".to_string()),
        bio: Some("Loves braising".to_string()),
        avatar_url: None,
        locale: "en-GB".to_string(),
        units: Units::Imperial,
        time_per_meal_minutes: 45,
        skill_level: SkillLevel::Intermediate,
        created_at: Some(chrono::Utc::now()),
        updated_at: None,
    }
}

pub fn manager(identity: &Arc<FakeIdentity>, store: &Arc<FakeProfileStore>) -> SessionManager {
    manager_with(identity, store, SessionConfig::default())
}

pub fn manager_with(
    identity: &Arc<FakeIdentity>,
    store: &Arc<FakeProfileStore>,
    config: SessionConfig,
) -> SessionManager {
    let _ = pantry_common::logging::init_tracing("pantry_session=debug");
    SessionManager::new(identity.clone(), store.clone(), config).expect("valid config")
}

/// Wait (on the paused clock) until a published snapshot satisfies `predicate`
pub async fn wait_until(
    manager: &SessionManager,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = manager.subscribe();
    let snapshot = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for session state")
        .expect("session state channel closed")
        .clone();
    snapshot
}

/// Let spawned tasks run to quiescence on the paused clock
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
