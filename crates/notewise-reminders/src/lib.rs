//! Reminder dispatch engine for Notewise.
//!
//! This crate owns the recurring pass that turns due note reminders into
//! push notifications:
//! - Computes the trailing delivery window from an injectable clock
//! - Reads due reminders from a [`ReminderStore`] in a single query
//! - Sends one notification per subscribed recipient through a [`PushProvider`],
//!   isolating failures per recipient
//! - Runs the pass once at start-up and then on wall-clock aligned boundaries,
//!   never overlapping two passes

mod clock;
mod dispatcher;
mod error;
mod ledger;
mod scheduler;
mod store;
mod types;
mod window;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatcher::{
    DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_SEND_TIMEOUT, Dispatcher, NotificationPayload,
    PushProvider,
};
pub use error::{DeliveryError, ReminderError, StoreError};
pub use ledger::DeliveryLedger;
pub use scheduler::{
    DEFAULT_TICK_INTERVAL, MAX_TICK_INTERVAL, ReminderScheduler, SchedulerConfig, next_boundary,
};
pub use store::{EXCERPT_CHARS, ReminderSource, ReminderStore, excerpt};
pub use types::{DeliveryOutcome, DeliveryResult, DueReminder, SchedulerState, TickReport};
pub use window::{DEFAULT_WINDOW, DeliveryWindow, MAX_WINDOW, WindowPolicy};
