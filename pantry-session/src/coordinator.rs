//! Initialization coordinator
//!
//! Collapses concurrent initialization triggers (startup, visibility regained,
//! auth push events) into one in-flight run:
//! - While a token exists, callers join the existing run instead of starting another
//! - The token is cleared inside the run, before any caller observes the outcome
//! - For `debounce` after completion, new requests are absorbed without running
//!
//! The run is spawned on the runtime so it finishes (and clears its token) even
//! if every waiting caller is dropped.

use crate::error::{Result, SessionError};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

type SharedRun = Shared<BoxFuture<'static, Result<()>>>;

/// Marker for the single in-flight initialization
struct InitToken {
    id: u64,
    started_at: Instant,
    completion: SharedRun,
}

#[derive(Default)]
struct CoordinatorState {
    token: Option<InitToken>,
    last_completed_at: Option<Instant>,
    next_id: u64,
}

/// How a call to `ensure_initialized` was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitDisposition {
    /// This call started the run
    Started,
    /// Joined a run already in flight
    Joined,
    /// Absorbed by the post-completion debounce window
    Debounced,
}

pub struct InitCoordinator {
    debounce: Duration,
    state: Arc<Mutex<CoordinatorState>>,
}

impl InitCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        }
    }

    /// Run `run` unless a run is in flight or just finished.
    ///
    /// Errors from `run` reach the caller that started it; joiners get `Ok(())`
    /// and read the outcome from published state.
    pub async fn ensure_initialized<F, Fut>(&self, run: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.ensure_initialized_with(run).await.map(|_| ())
    }

    /// Same as [`Self::ensure_initialized`], also reporting how the call was served
    pub async fn ensure_initialized_with<F, Fut>(&self, run: F) -> Result<InitDisposition>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (completion, disposition) = {
            let mut state = self.state.lock();

            if let Some(token) = &state.token {
                debug!(
                    token = token.id,
                    in_flight_ms = token.started_at.elapsed().as_millis() as u64,
                    "Initialization already in flight, joining"
                );
                (token.completion.clone(), InitDisposition::Joined)
            } else if state
                .last_completed_at
                .is_some_and(|done| done.elapsed() < self.debounce)
            {
                debug!("Initialization completed moments ago, request absorbed");
                return Ok(InitDisposition::Debounced);
            } else {
                let id = state.next_id;
                state.next_id += 1;

                let completion = self.spawn_run(id, run());
                state.token = Some(InitToken {
                    id,
                    started_at: Instant::now(),
                    completion: completion.clone(),
                });
                debug!(token = id, "Initialization started");
                (completion, InitDisposition::Started)
            }
        };

        let outcome = completion.await;
        match (disposition, outcome) {
            (InitDisposition::Joined, Err(err)) => {
                debug!(error = %err, "Joined initialization failed");
                Ok(disposition)
            }
            (_, outcome) => outcome.map(|_| disposition),
        }
    }

    fn spawn_run<Fut>(&self, id: u64, run: Fut) -> SharedRun
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move {
            let outcome = run.await;

            let mut state = state.lock();
            if state.token.as_ref().map(|t| t.id) == Some(id) {
                state.token = None;
            }
            state.last_completed_at = Some(Instant::now());
            outcome
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(SessionError::Internal(format!("initialization task failed: {}", e))))
        }
        .boxed()
        .shared()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().token.is_some()
    }

    pub fn last_completed_at(&self) -> Option<Instant> {
        self.state.lock().last_completed_at
    }

    /// Forget the last completion so the next request is never debounced
    ///
    /// Called when the subject changes (sign-out, sign-in as someone else).
    pub fn reset_debounce(&self) {
        self.state.lock().last_completed_at = None;
    }
}
