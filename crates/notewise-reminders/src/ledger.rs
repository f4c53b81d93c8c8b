//! In-process record of reminders already delivered.
//!
//! The window is re-evaluated on every tick and the store has no delivered
//! marker, so a reminder can fall inside the windows of two ticks (the
//! forced start-up tick and the next boundary tick, or a window longer than
//! the cadence). The ledger remembers successful deliveries by
//! `(note, recipient, due_at)` until the due-timestamp leaves the window.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{DeliveryOutcome, DeliveryResult, DeliveryWindow, DueReminder};

type DeliveryKey = (i64, i64, DateTime<Utc>);

fn key_of(note_id: i64, recipient_id: i64, due_at: DateTime<Utc>) -> DeliveryKey {
    (note_id, recipient_id, due_at)
}

/// Successful deliveries still inside the delivery window.
#[derive(Debug, Default)]
pub struct DeliveryLedger {
    delivered: HashSet<DeliveryKey>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.delivered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty()
    }

    /// Split candidates into those still to send and suppressed results for
    /// those already delivered.
    pub fn filter_new(
        &self,
        candidates: Vec<DueReminder>,
    ) -> (Vec<DueReminder>, Vec<DeliveryResult>) {
        let (seen, fresh): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|r| self.delivered.contains(&key_of(r.note_id, r.recipient_id, r.due_at)));

        let suppressed = seen
            .into_iter()
            .map(|r| {
                debug!(
                    note_id = r.note_id,
                    recipient_id = r.recipient_id,
                    "reminder already delivered, suppressing"
                );
                DeliveryResult {
                    note_id: r.note_id,
                    recipient_id: r.recipient_id,
                    due_at: r.due_at,
                    outcome: DeliveryOutcome::Suppressed,
                }
            })
            .collect();

        (fresh, suppressed)
    }

    /// Remember delivered results. Failures are not recorded so they are
    /// retried while the reminder is still in the window.
    pub fn record(&mut self, results: &[DeliveryResult]) {
        for result in results {
            if result.outcome == DeliveryOutcome::Delivered {
                self.delivered
                    .insert(key_of(result.note_id, result.recipient_id, result.due_at));
            }
        }
    }

    /// Forget deliveries whose due-timestamp can no longer be inside a
    /// window at or after `window`.
    pub fn prune(&mut self, window: &DeliveryWindow) {
        self.delivered.retain(|(_, _, due_at)| *due_at > window.after);
    }
}
