//! Event types for the Haven event system
//!
//! Provides the shared event enum and the broadcast EventBus. Events are
//! serialized for SSE transmission with a `type` tag.

use crate::db::models::{SessionCompletionTrigger, SessionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Haven event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HavenEvent {
    /// A session passed its gate and reached the active state
    SessionStarted {
        session_id: Uuid,
        user_id: String,
        kind: SessionKind,
        /// True when the video provider was replaced by the local asset
        fallback_mode: bool,
        timestamp: DateTime<Utc>,
    },

    /// First completion of a session; repeated completions emit nothing
    SessionCompleted {
        session_id: Uuid,
        user_id: String,
        minutes_consumed: u32,
        trigger: SessionCompletionTrigger,
        timestamp: DateTime<Utc>,
    },

    /// A gate refused an action
    QuotaDenied {
        user_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Subscription moved to another plan (purchase, restore, expiry)
    PlanChanged {
        user_id: String,
        old_plan_id: String,
        new_plan_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The video provider was unavailable and the fallback asset was served
    VideoFallbackUsed {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl HavenEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            HavenEvent::SessionStarted { .. } => "SessionStarted",
            HavenEvent::SessionCompleted { .. } => "SessionCompleted",
            HavenEvent::QuotaDenied { .. } => "QuotaDenied",
            HavenEvent::PlanChanged { .. } => "PlanChanged",
            HavenEvent::VideoFallbackUsed { .. } => "VideoFallbackUsed",
        }
    }

    /// User the event concerns, when it concerns a single user
    pub fn user_id(&self) -> Option<&str> {
        match self {
            HavenEvent::SessionStarted { user_id, .. }
            | HavenEvent::SessionCompleted { user_id, .. }
            | HavenEvent::QuotaDenied { user_id, .. }
            | HavenEvent::PlanChanged { user_id, .. } => Some(user_id),
            HavenEvent::VideoFallbackUsed { .. } => None,
        }
    }
}

/// Central event distribution bus
///
/// Publishing never blocks; slow subscribers observe `Lagged` and skip ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<HavenEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<HavenEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: HavenEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
