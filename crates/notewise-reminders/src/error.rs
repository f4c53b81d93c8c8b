//! Error types for the reminder engine.

use std::time::Duration;

use thiserror::Error;

/// Errors that abort a whole tick or prevent the scheduler from starting.
#[derive(Debug, Error)]
pub enum ReminderError {
    /// The reminder store could not be queried.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Another tick is still running in this process.
    #[error("a reminder tick is already in progress")]
    TickInProgress,

    /// Invalid scheduler or window configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors reported by a [`ReminderStore`](crate::ReminderStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The due-reminder query failed.
    #[error("reminder query failed: {0}")]
    Query(String),

    /// The backing store is not reachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors for a single delivery to a single recipient.
///
/// None of these abort the tick; they are captured per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The stored subscription blob could not be understood.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The push service reports the subscription as expired or unsubscribed.
    #[error("subscription is gone (HTTP {status})")]
    Gone { status: u16 },

    /// The push service rejected the message.
    #[error("push service rejected message (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// The push service asked us to slow down.
    #[error("rate limited by push service{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited { retry_after_secs: Option<u64> },

    /// The send did not complete in time.
    #[error("push send timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Transport or provider-side failure before a response was received.
    #[error("push transport error: {0}")]
    Transport(String),
}
