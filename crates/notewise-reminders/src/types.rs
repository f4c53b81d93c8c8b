//! Reminder engine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DeliveryError, DeliveryWindow};

/// A note whose reminder falls inside the current delivery window, joined
/// with its owner's push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueReminder {
    /// Note identifier.
    pub note_id: i64,
    /// Note title.
    pub title: String,
    /// Leading part of the note body.
    pub body_excerpt: String,
    /// Owner of the note.
    pub recipient_id: i64,
    /// Serialized push subscription, if the owner has one.
    pub subscription: Option<String>,
    /// When the reminder is due.
    pub due_at: DateTime<Utc>,
}

/// What happened to one (note, recipient) pair during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// The push service accepted the notification.
    Delivered,
    /// The recipient has no push subscription.
    Skipped,
    /// Already delivered by an earlier tick in this process.
    Suppressed,
    /// Delivery failed; other recipients are unaffected.
    Failed { reason: String },
}

impl DeliveryOutcome {
    pub fn failed(error: &DeliveryError) -> Self {
        Self::Failed {
            reason: error.to_string(),
        }
    }
}

/// Outcome for one (note, recipient) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub note_id: i64,
    pub recipient_id: i64,
    pub due_at: DateTime<Utc>,
    pub outcome: DeliveryOutcome,
}

/// Summary of one scan-and-dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// When the tick started.
    pub started_at: DateTime<Utc>,
    /// The window that was evaluated.
    pub window: DeliveryWindow,
    /// Number of due reminders the store returned.
    pub candidates: usize,
    /// Per-pair outcomes, in no particular order.
    pub results: Vec<DeliveryResult>,
}

impl TickReport {
    fn count(&self, pred: impl Fn(&DeliveryOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Delivered))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Skipped))
    }

    pub fn suppressed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Suppressed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DeliveryOutcome::Failed { .. }))
    }
}

/// Scheduler loop state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// Executing a tick.
    Ticking,
}
