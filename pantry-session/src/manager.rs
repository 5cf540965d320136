//! Session state machine
//!
//! ```text
//! Uninitialized ──ensure_initialized──▶ Initializing ──session──▶ Authenticated(Approximate)
//!                                            │                         │ authoritative resolved
//!                                            │ no session / timeout    ▼
//!                                            └──────▶ Anonymous ◀── Authenticated(Profile)
//!                                                        sign-out
//! ```
//!
//! Every asynchronously resolved result carries the epoch it was started
//! under. The epoch is bumped (under the watch channel's write lock) whenever
//! the subject changes or the session is cleared, so results for a subject
//! that is no longer current are dropped instead of published.

use crate::cache::ProfileCache;
use crate::clients::{AuthEvent, AuthEventKind, IdentityBackend, ProfileStore, Session};
use crate::config::SessionConfig;
use crate::coordinator::{InitCoordinator, InitDisposition};
use crate::error::{with_timeout, Result, SessionError};
use crate::loader::ProfileLoader;
use crate::model::{CurrentProfile, Profile, Subject, SubjectId};
use crate::retry::RetryController;
use crate::state::SessionSnapshot;
use chrono::Utc;
use futures::future::BoxFuture;
use pantry_common::events::{EventBus, PantryEvent, ProfileSource, SessionPhase};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Handle to the session engine
///
/// Cheap to clone; construct once and pass it to whatever needs session state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    identity: Arc<dyn IdentityBackend>,
    loader: Arc<ProfileLoader>,
    cache: Arc<ProfileCache>,
    retry: Arc<RetryController>,
    coordinator: InitCoordinator,
    config: SessionConfig,
    state_tx: watch::Sender<SessionSnapshot>,
    events: EventBus,
    epoch: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
    pending_retry: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<dyn IdentityBackend>,
        store: Arc<dyn ProfileStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ProfileCache::new(Duration::from_millis(config.cache.ttl_ms)));
        let retry = Arc::new(RetryController::new(config.retry.clone()));
        let loader = Arc::new(ProfileLoader::new(
            store,
            Arc::clone(&cache),
            Arc::clone(&retry),
            config.defaults.clone(),
            config.profile_timeout(),
        ));
        let (state_tx, _) = watch::channel(SessionSnapshot::uninitialized());

        Ok(Self {
            inner: Arc::new(Inner {
                identity,
                loader,
                cache,
                retry,
                coordinator: InitCoordinator::new(Duration::from_millis(config.init.debounce_ms)),
                events: EventBus::new(config.event_capacity),
                config,
                state_tx,
                epoch: AtomicU64::new(0),
                listener: Mutex::new(None),
                pending_retry: Mutex::new(None),
            }),
        })
    }

    /// Subscribe to identity events (once) and run the initial session lookup
    pub async fn start(&self) -> Result<()> {
        {
            let mut listener = self.inner.listener.lock();
            if listener.is_none() {
                let rx = self.inner.identity.subscribe();
                *listener = Some(tokio::spawn(listen(Arc::downgrade(&self.inner), rx)));
                debug!("Subscribed to identity events");
            }
        }
        self.ensure_initialized().await
    }

    /// Unsubscribe from identity events and cancel any scheduled profile retry
    pub fn shutdown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.abort();
            debug!("Unsubscribed from identity events");
        }
        self.inner.cancel_pending_retry();
    }

    /// Idempotent initialization; concurrent callers share one session lookup
    ///
    /// Only the caller that started the lookup sees its error; the published
    /// state is always resolved either way.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .coordinator
            .ensure_initialized(move || async move { inner.initialize().await })
            .await
    }

    /// Clear local session state and revoke the remote session.
    ///
    /// Never fails: local state is cleared first and a failing backend call is
    /// only logged.
    pub async fn sign_out(&self) {
        self.inner.go_anonymous(None, None, "sign-out requested");

        let limit = self.inner.config.sign_out_timeout();
        match with_timeout("sign out", limit, self.inner.identity.sign_out()).await {
            Ok(Ok(())) => debug!("Remote session revoked"),
            Ok(Err(err)) => warn!(error = %err, "Backend sign-out failed, local session already cleared"),
            Err(err) => warn!(error = %err, "Backend sign-out timed out, local session already cleared"),
        }
    }

    /// Force a fresh authoritative fetch for the current subject.
    ///
    /// No-op without a signed-in subject. On failure the previously published
    /// profile stays in place.
    pub async fn refresh_profile(&self) {
        let (id, epoch) = {
            let snapshot = self.inner.state_tx.borrow();
            match (snapshot.phase, snapshot.subject_id()) {
                (SessionPhase::Authenticated, Some(id)) => {
                    (id.clone(), self.inner.epoch.load(Ordering::SeqCst))
                }
                _ => {
                    debug!("refresh_profile called without a signed-in subject, ignoring");
                    return;
                }
            }
        };

        self.inner.cancel_pending_retry();
        self.inner.cache.invalidate(&id);
        self.inner.retry.reset(&id);
        self.inner.publish_if_current(epoch, |s| s.loading = true);

        info!(subject = %id, "Refreshing profile");
        let result = self.inner.loader.authoritative(&id).await;
        self.inner.apply_authoritative(&id, epoch, result, 0);
    }

    /// Feed one identity event through the state machine
    ///
    /// The subscription started by [`Self::start`] calls this in arrival order.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        debug!(kind = ?event.kind, "Identity event");
        match (event.kind, event.session) {
            (AuthEventKind::SignedIn, Some(session)) => self.on_signed_in(session).await,
            (AuthEventKind::SignedIn, None) => {
                warn!("SIGNED_IN without a session, re-checking with the backend");
                if let Err(err) = self.ensure_initialized().await {
                    debug!(error = %err, "Re-check after SIGNED_IN failed");
                }
            }
            (AuthEventKind::SignedOut, _) => {
                self.inner.go_anonymous(None, None, "signed out by identity backend");
            }
            (AuthEventKind::TokenRefreshed, Some(session)) => self.on_token_refreshed(session).await,
            (AuthEventKind::TokenRefreshed, None) => debug!("TOKEN_REFRESHED without a session, ignoring"),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state_tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state_tx.subscribe()
    }

    /// Discrete transition events
    pub fn events(&self) -> broadcast::Receiver<PantryEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn current_subject_id(&self) -> Option<SubjectId> {
        self.inner.state_tx.borrow().subject_id().cloned()
    }

    /// Valid cache entry for `id`, if any (diagnostics)
    pub fn cached_profile(&self, id: &SubjectId) -> Option<Profile> {
        self.inner.cache.get(id)
    }

    /// Failed automatic fetches recorded for `id` since the last reset (diagnostics)
    pub fn retry_attempts(&self, id: &SubjectId) -> u32 {
        self.inner.retry.attempts(id)
    }

    async fn on_signed_in(&self, session: Session) {
        let subject = session.subject;
        let current = self.current_subject_id();

        if current.as_ref() != Some(&subject.id) {
            if let Some(previous) = &current {
                info!(previous = %previous, subject = %subject.id, "Switching subject");
                self.inner.forget_subject(previous);
            }
            self.inner.coordinator.reset_debounce();
        }

        let inner = Arc::clone(&self.inner);
        let run_subject = subject.clone();
        let disposition = self
            .inner
            .coordinator
            .ensure_initialized_with(move || async move {
                inner.mark_initializing();
                inner.establish(run_subject, None);
                Ok(())
            })
            .await;

        // A joined or absorbed run may have resolved to another (older) answer
        if !matches!(disposition, Ok(InitDisposition::Started))
            && self.current_subject_id().as_ref() != Some(&subject.id)
        {
            debug!(subject = %subject.id, "Sign-in is newer than the settled initialization");
            if let Some(previous) = self.current_subject_id() {
                self.inner.forget_subject(&previous);
            }
            self.inner.establish(subject, None);
        }
    }

    async fn on_token_refreshed(&self, session: Session) {
        let current = {
            let snapshot = self.inner.state_tx.borrow();
            (snapshot.is_authenticated() && snapshot.subject_id() == Some(&session.subject.id)).then(
                || {
                    (
                        self.inner.epoch.load(Ordering::SeqCst),
                        !snapshot.has_authoritative_profile(),
                    )
                },
            )
        };
        let Some((epoch, needs_profile)) = current else {
            debug!(subject = %session.subject.id, "Token refresh for a new subject, treating as sign-in");
            return self.on_signed_in(session).await;
        };

        let id = session.subject.id.clone();
        self.inner
            .publish_if_current(epoch, |s| s.user = Some(session.subject));

        if needs_profile {
            debug!(subject = %id, "Token refreshed while profile approximate, reloading");
            let authoritative = self.inner.loader.load_authoritative(&id);
            self.inner.spawn_resolution(id, epoch, authoritative);
        }
    }
}

impl Inner {
    async fn initialize(self: Arc<Self>) -> Result<()> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        self.mark_initializing();

        let limit = self.config.session_timeout();
        let lookup = with_timeout("session lookup", limit, self.identity.get_session()).await;

        match lookup {
            Ok(Ok(Some(session))) => {
                if !self.establish(session.subject, Some(epoch)) {
                    debug!("Session lookup superseded by a newer identity event");
                }
                Ok(())
            }
            Ok(Ok(None)) => {
                debug!("No active session");
                self.go_anonymous(Some(epoch), None, "no active session");
                Ok(())
            }
            Ok(Err(err)) => {
                let err = SessionError::from(err);
                self.settle_failed_lookup(epoch, format!("Authentication error: {}", err), &err);
                Err(err)
            }
            Err(err) => {
                self.settle_failed_lookup(
                    epoch,
                    "Authentication error: session lookup timed out".to_string(),
                    &err,
                );
                Err(err)
            }
        }
    }

    /// Resolve a lookup that failed or timed out.
    ///
    /// A signed-in subject survives a failed re-check; only a lookup that
    /// answers "no session" ends it. Otherwise settle Anonymous with `message`.
    fn settle_failed_lookup(&self, epoch: u64, message: String, err: &SessionError) {
        let mut old_phase = None;

        self.state_tx.send_if_modified(|snap| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            old_phase = Some(snap.phase);
            snap.loading = false;
            if !snap.is_authenticated() {
                self.epoch.fetch_add(1, Ordering::SeqCst);
                snap.phase = SessionPhase::Anonymous;
                snap.user = None;
                snap.profile = None;
                snap.error = Some(message);
            }
            true
        });

        match old_phase {
            Some(SessionPhase::Authenticated) => {
                warn!(error = %err, "Session re-check failed, keeping the signed-in subject");
            }
            Some(old) => {
                error!(error = %err, "Session lookup failed, continuing signed out");
                self.emit_phase_change(old, SessionPhase::Anonymous);
            }
            None => debug!(error = %err, "Failed session lookup superseded by a newer identity event"),
        }
    }

    fn mark_initializing(&self) {
        self.publish(|s| {
            if s.phase != SessionPhase::Authenticated {
                s.phase = SessionPhase::Initializing;
                s.error = None;
            }
            s.loading = true;
        });
    }

    /// Publish `subject` as authenticated and start the authoritative fetch.
    ///
    /// Returns false if `expected_epoch` is given and no longer current.
    fn establish(self: &Arc<Self>, subject: Subject, expected_epoch: Option<u64>) -> bool {
        let load = self.loader.load(&subject);
        let id = subject.id.clone();
        let mut outcome = None;

        self.state_tx.send_if_modified(|snap| {
            let current = self.epoch.load(Ordering::SeqCst);
            if expected_epoch.is_some_and(|e| e != current) {
                return false;
            }

            let same_subject = snap.is_authenticated() && snap.subject_id() == Some(&id);
            let epoch = if same_subject {
                current
            } else {
                self.epoch.fetch_add(1, Ordering::SeqCst) + 1
            };
            // Never regress an authoritative profile to the stand-in
            let keep_profile = same_subject && snap.has_authoritative_profile();

            let old_phase = snap.phase;
            snap.phase = SessionPhase::Authenticated;
            snap.user = Some(subject);
            snap.error = None;
            snap.loading = true;
            if !keep_profile {
                snap.profile = Some(CurrentProfile::Approximate(load.immediate.clone()));
            }

            outcome = Some((epoch, old_phase, same_subject, keep_profile));
            true
        });

        let Some((epoch, old_phase, same_subject, keep_profile)) = outcome else {
            return false;
        };

        self.emit_phase_change(old_phase, SessionPhase::Authenticated);
        if !same_subject {
            info!(subject = %id, "Subject signed in");
        }
        if !keep_profile {
            self.emit_profile_applied(&id, ProfileSource::Approximate);
        }
        self.spawn_resolution(id, epoch, load.authoritative);
        true
    }

    fn spawn_resolution(
        self: &Arc<Self>,
        id: SubjectId,
        epoch: u64,
        authoritative: BoxFuture<'static, Option<Profile>>,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let attempts_before = inner.retry.attempts(&id);
            let result = authoritative.await;
            inner.apply_authoritative(&id, epoch, result, attempts_before);
        });
    }

    /// Publish an authoritative result if its subject is still current
    fn apply_authoritative(
        self: &Arc<Self>,
        id: &SubjectId,
        epoch: u64,
        result: Option<Profile>,
        attempts_before: u32,
    ) {
        match result {
            Some(profile) => {
                let applied = self.publish_if_current(epoch, |s| {
                    s.profile = Some(CurrentProfile::Authoritative(profile));
                    s.loading = false;
                });
                if applied {
                    info!(subject = %id, "Authoritative profile applied");
                    self.emit_profile_applied(id, ProfileSource::Authoritative);
                } else {
                    debug!(subject = %id, "Discarding profile for a subject that is no longer current");
                    // The loader already wrote it through; don't keep a signed-out subject's record
                    if self.state_tx.borrow().subject_id() != Some(id) {
                        self.cache.invalidate(id);
                    }
                }
            }
            None => {
                if !self.publish_if_current(epoch, |s| s.loading = false) {
                    debug!(subject = %id, "Discarding failed fetch for a subject that is no longer current");
                    if self.state_tx.borrow().subject_id() != Some(id) {
                        self.retry.reset(id);
                    }
                    return;
                }
                let attempts = self.retry.attempts(id);
                if attempts > attempts_before {
                    self.schedule_retry(id, epoch, attempts);
                }
            }
        }
    }

    fn schedule_retry(self: &Arc<Self>, id: &SubjectId, epoch: u64, attempts: u32) {
        let Some(delay) = self.retry.next_delay(id) else {
            warn!(subject = %id, attempts, "Keeping current profile, no further automatic fetches");
            self.events.emit_lossy(PantryEvent::ProfileCircuitOpen {
                subject_id: id.to_string(),
                attempts,
                timestamp: Utc::now(),
            });
            return;
        };

        debug!(subject = %id, attempt = attempts, delay_ms = delay.as_millis() as u64, "Scheduling profile retry");
        self.events.emit_lossy(PantryEvent::ProfileRetryScheduled {
            subject_id: id.to_string(),
            attempt: attempts,
            delay_ms: delay.as_millis() as u64,
            timestamp: Utc::now(),
        });

        let inner = Arc::clone(self);
        let id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            let attempts_before = inner.retry.attempts(&id);
            let result = inner.loader.authoritative(&id).await;
            inner.apply_authoritative(&id, epoch, result, attempts_before);
        });

        // The replaced handle is either finished or the task now rescheduling itself
        if let Some(previous) = self.pending_retry.lock().replace(handle) {
            previous.abort();
        }
    }

    fn cancel_pending_retry(&self) {
        if let Some(handle) = self.pending_retry.lock().take() {
            handle.abort();
        }
    }

    /// Drop cached profile and retry history for a subject leaving the session
    fn forget_subject(&self, id: &SubjectId) {
        self.cancel_pending_retry();
        self.cache.invalidate(id);
        self.retry.reset(id);
    }

    /// Move to Anonymous, clearing the subject and everything keyed by it.
    ///
    /// With `expected_epoch`, does nothing if a newer identity change happened.
    fn go_anonymous(
        &self,
        expected_epoch: Option<u64>,
        error: Option<String>,
        reason: &'static str,
    ) -> bool {
        let mut transition = None;

        self.state_tx.send_if_modified(|snap| {
            if expected_epoch.is_some_and(|e| e != self.epoch.load(Ordering::SeqCst)) {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);

            let old_phase = snap.phase;
            let previous = snap.user.take();
            snap.phase = SessionPhase::Anonymous;
            snap.profile = None;
            snap.loading = false;
            snap.error = error;

            transition = Some((old_phase, previous));
            true
        });

        let Some((old_phase, previous)) = transition else {
            debug!(reason, "Anonymous transition superseded");
            return false;
        };

        self.cancel_pending_retry();
        if let Some(user) = previous {
            info!(subject = %user.id, reason, "Session cleared");
            self.forget_subject(&user.id);
            self.coordinator.reset_debounce();
            self.events.emit_lossy(PantryEvent::SignedOut {
                subject_id: user.id.to_string(),
                timestamp: Utc::now(),
            });
        }
        self.emit_phase_change(old_phase, SessionPhase::Anonymous);
        true
    }

    fn publish(&self, update: impl FnOnce(&mut SessionSnapshot)) {
        let mut phases = None;
        self.state_tx.send_modify(|snap| {
            let old = snap.phase;
            update(snap);
            phases = Some((old, snap.phase));
        });
        if let Some((old, new)) = phases {
            self.emit_phase_change(old, new);
        }
    }

    /// Apply `update` only if no subject change happened since `epoch`
    fn publish_if_current(&self, epoch: u64, update: impl FnOnce(&mut SessionSnapshot)) -> bool {
        let mut phases = None;
        let applied = self.state_tx.send_if_modified(|snap| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            let old = snap.phase;
            update(snap);
            phases = Some((old, snap.phase));
            true
        });
        if let Some((old, new)) = phases {
            self.emit_phase_change(old, new);
        }
        applied
    }

    fn emit_phase_change(&self, old_phase: SessionPhase, new_phase: SessionPhase) {
        if old_phase == new_phase {
            return;
        }
        debug!(from = ?old_phase, to = ?new_phase, "Session phase changed");
        self.events.emit_lossy(PantryEvent::SessionStateChanged {
            old_phase,
            new_phase,
            timestamp: Utc::now(),
        });
    }

    fn emit_profile_applied(&self, id: &SubjectId, source: ProfileSource) {
        self.events.emit_lossy(PantryEvent::ProfileApplied {
            subject_id: id.to_string(),
            source,
            timestamp: Utc::now(),
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.abort();
        }
        if let Some(handle) = self.pending_retry.get_mut().take() {
            handle.abort();
        }
    }
}

/// Identity event loop; holds only a weak handle so dropping the manager ends it
async fn listen(inner: Weak<Inner>, mut rx: broadcast::Receiver<AuthEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                SessionManager { inner }.handle_auth_event(event).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Identity events lagged, re-checking session");
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.coordinator.reset_debounce();
                if let Err(err) = (SessionManager { inner }).ensure_initialized().await {
                    debug!(error = %err, "Re-check after lag failed");
                }
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Identity event stream closed");
                break;
            }
        }
    }
}
