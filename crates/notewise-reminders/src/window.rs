//! Delivery window policy.
//!
//! A reminder is eligible on a tick iff its due-timestamp `t` satisfies
//! `now - size < t <= now`. The window is recomputed from the clock on
//! every tick and never stored.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ReminderError;

/// Default window size (60 seconds).
pub const DEFAULT_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

/// Longest accepted window (thirty days).
pub const MAX_WINDOW: std::time::Duration = std::time::Duration::from_secs(30 * 24 * 60 * 60);

/// The half-open interval `(after, until]` of due-timestamps eligible on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryWindow {
    /// Exclusive lower bound.
    pub after: DateTime<Utc>,
    /// Inclusive upper bound.
    pub until: DateTime<Utc>,
}

impl DeliveryWindow {
    /// Whether `t` falls inside `(after, until]`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.after < t && t <= self.until
    }

    /// Width of the window.
    pub fn size(&self) -> Duration {
        self.until - self.after
    }
}

impl fmt::Display for DeliveryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.after.to_rfc3339(), self.until.to_rfc3339())
    }
}

/// Computes the delivery window for a reference time.
#[derive(Debug, Clone, Copy)]
pub struct WindowPolicy {
    size: Duration,
}

impl WindowPolicy {
    /// Create a policy with the given window size.
    pub fn new(size: std::time::Duration) -> Result<Self, ReminderError> {
        if size.is_zero() {
            return Err(ReminderError::InvalidConfig(
                "delivery window must be longer than zero".to_string(),
            ));
        }
        if size > MAX_WINDOW {
            return Err(ReminderError::InvalidConfig(format!(
                "delivery window of {}s exceeds the maximum of {}s",
                size.as_secs(),
                MAX_WINDOW.as_secs()
            )));
        }
        let size = Duration::from_std(size).map_err(|e| {
            ReminderError::InvalidConfig(format!("delivery window out of range: {}", e))
        })?;
        Ok(Self { size })
    }

    pub fn size(&self) -> Duration {
        self.size
    }

    /// The window `(now - size, now]`. Saturates at the earliest
    /// representable instant.
    pub fn window_at(&self, now: DateTime<Utc>) -> DeliveryWindow {
        DeliveryWindow {
            after: now
                .checked_sub_signed(self.size)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            until: now,
        }
    }

    /// Upper bound on how many consecutive ticks can see the same reminder:
    /// `ceil(size / tick_interval)`.
    pub fn max_deliveries(&self, tick_interval: std::time::Duration) -> u64 {
        let tick_ms = tick_interval.as_millis().max(1);
        let size_ms = self.size.num_milliseconds().max(0) as u128;
        size_ms.div_ceil(tick_ms) as u64
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            size: Duration::seconds(DEFAULT_WINDOW.as_secs() as i64),
        }
    }
}
