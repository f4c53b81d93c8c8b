//! Reminder store contract and accessor.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{DeliveryWindow, DueReminder, ReminderError, StoreError};

/// Maximum number of characters of note body sent in a notification.
pub const EXCERPT_CHARS: usize = 100;

/// Read access to notes with reminders.
///
/// Implementations must answer with a single logical read: every note with
/// its reminder flag set and a due-timestamp inside `window`, joined with the
/// owner's push subscription.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    async fn due_reminders(&self, window: &DeliveryWindow)
    -> Result<Vec<DueReminder>, StoreError>;
}

/// Fetches candidate reminders for a tick.
#[derive(Clone)]
pub struct ReminderSource {
    store: Arc<dyn ReminderStore>,
}

impl ReminderSource {
    pub fn new(store: Arc<dyn ReminderStore>) -> Self {
        Self { store }
    }

    /// Fetch all reminders due inside `window`.
    ///
    /// Rows outside the window are dropped and excerpts are capped at
    /// [`EXCERPT_CHARS`], whatever the store returned.
    #[tracing::instrument(skip(self), fields(window = %window))]
    pub async fn fetch(&self, window: &DeliveryWindow) -> Result<Vec<DueReminder>, ReminderError> {
        let rows = self.store.due_reminders(window).await?;
        let returned = rows.len();

        let reminders: Vec<DueReminder> = rows
            .into_iter()
            .filter(|r| window.contains(r.due_at))
            .map(|mut r| {
                r.body_excerpt = excerpt(&r.body_excerpt, EXCERPT_CHARS);
                r
            })
            .collect();

        debug!(
            returned,
            candidates = reminders.len(),
            "fetched due reminders"
        );
        Ok(reminders)
    }
}

/// First `max_chars` characters of `text`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
