//! Push dispatcher.
//!
//! Maps a batch of due reminders to per-recipient delivery results. Sends run
//! concurrently up to a bound, each under its own timeout, and a failure for
//! one recipient never affects another.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{DeliveryError, DeliveryOutcome, DeliveryResult, DueReminder, EXCERPT_CHARS, excerpt};

/// Default bound on a single provider call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of sends in flight at once.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;

/// Relays an opaque payload to one push subscription.
#[async_trait]
pub trait PushProvider: Send + Sync {
    /// Send `payload` verbatim to the endpoint described by `subscription`.
    async fn send(&self, subscription: &str, payload: &str) -> Result<(), DeliveryError>;
}

/// The notification body delivered to the client.
///
/// `noteId` lets the client deep-link to the note when the notification is
/// clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub content: String,
    pub note_id: i64,
}

impl NotificationPayload {
    pub fn for_reminder(reminder: &DueReminder) -> Self {
        Self {
            title: reminder.title.clone(),
            content: excerpt(&reminder.body_excerpt, EXCERPT_CHARS),
            note_id: reminder.note_id,
        }
    }
}

/// Sends one notification per subscribed recipient.
#[derive(Clone)]
pub struct Dispatcher {
    provider: Arc<dyn PushProvider>,
    send_timeout: Duration,
    max_concurrent_sends: usize,
}

impl Dispatcher {
    pub fn new(provider: Arc<dyn PushProvider>) -> Self {
        Self {
            provider,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_sends(mut self, max: usize) -> Self {
        self.max_concurrent_sends = max.max(1);
        self
    }

    /// Attempt delivery for every reminder. Returns one result per input, in
    /// no particular order.
    pub async fn dispatch(&self, reminders: Vec<DueReminder>) -> Vec<DeliveryResult> {
        if reminders.is_empty() {
            return Vec::new();
        }

        stream::iter(reminders)
            .map(|reminder| self.deliver(reminder))
            .buffer_unordered(self.max_concurrent_sends)
            .collect()
            .await
    }

    async fn deliver(&self, reminder: DueReminder) -> DeliveryResult {
        let outcome = match subscription_of(&reminder) {
            None => {
                debug!(
                    note_id = reminder.note_id,
                    recipient_id = reminder.recipient_id,
                    "recipient has no push subscription, skipping"
                );
                DeliveryOutcome::Skipped
            }
            Some(subscription) => match self.send(subscription, &reminder).await {
                Ok(()) => {
                    info!(
                        note_id = reminder.note_id,
                        recipient_id = reminder.recipient_id,
                        title = %reminder.title,
                        "sent reminder"
                    );
                    DeliveryOutcome::Delivered
                }
                Err(e) => {
                    warn!(
                        note_id = reminder.note_id,
                        recipient_id = reminder.recipient_id,
                        error = %e,
                        "failed to send reminder"
                    );
                    DeliveryOutcome::failed(&e)
                }
            },
        };

        DeliveryResult {
            note_id: reminder.note_id,
            recipient_id: reminder.recipient_id,
            due_at: reminder.due_at,
            outcome,
        }
    }

    async fn send(&self, subscription: &str, reminder: &DueReminder) -> Result<(), DeliveryError> {
        let payload = serde_json::to_string(&NotificationPayload::for_reminder(reminder))
            .map_err(|e| DeliveryError::Transport(format!("failed to encode payload: {}", e)))?;

        match tokio::time::timeout(self.send_timeout, self.provider.send(subscription, &payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
        }
    }
}

/// An empty or blank blob counts as no subscription.
fn subscription_of(reminder: &DueReminder) -> Option<&str> {
    reminder
        .subscription
        .as_deref()
        .filter(|s| !s.trim().is_empty())
}
