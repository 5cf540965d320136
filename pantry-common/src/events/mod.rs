//! Event types for the Pantry event system
//!
//! Provides shared event definitions and the EventBus used by Pantry engines
//! to notify observers of discrete transitions.

mod session_types;

pub use session_types::{ProfileSource, SessionPhase};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pantry event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so a
/// host can forward them to a UI unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PantryEvent {
    /// Session state machine moved between phases
    SessionStateChanged {
        /// Phase before the change
        old_phase: SessionPhase,
        /// Phase after the change
        new_phase: SessionPhase,
        /// When the change was published
        timestamp: DateTime<Utc>,
    },

    /// A profile was published for the current subject
    ///
    /// Emitted once for the approximate stand-in and again when the
    /// authoritative record replaces it.
    ProfileApplied {
        subject_id: String,
        source: ProfileSource,
        timestamp: DateTime<Utc>,
    },

    /// An automatic authoritative fetch was scheduled after a transient failure
    ProfileRetryScheduled {
        subject_id: String,
        /// Attempts recorded so far (1-based)
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Retry budget exhausted; no more automatic fetches until an explicit refresh
    ProfileCircuitOpen {
        subject_id: String,
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Local session state for a subject was cleared
    SignedOut {
        subject_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl PantryEvent {
    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            PantryEvent::SessionStateChanged { .. } => "SessionStateChanged",
            PantryEvent::ProfileApplied { .. } => "ProfileApplied",
            PantryEvent::ProfileRetryScheduled { .. } => "ProfileRetryScheduled",
            PantryEvent::ProfileCircuitOpen { .. } => "ProfileCircuitOpen",
            PantryEvent::SignedOut { .. } => "SignedOut",
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use pantry_common::events::{EventBus, PantryEvent, SessionPhase};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PantryEvent::SessionStateChanged {
///     old_phase: SessionPhase::Uninitialized,
///     new_phase: SessionPhase::Initializing,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PantryEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<PantryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PantryEvent,
    ) -> Result<usize, broadcast::error::SendError<PantryEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PantryEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
