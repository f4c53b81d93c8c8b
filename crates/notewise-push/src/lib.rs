//! Web Push delivery for Notewise reminders.
//!
//! Signs each message with the application's VAPID key, encrypts the payload
//! for the recipient's subscription (aes128gcm) and posts it to the
//! subscription endpoint.

mod error;
mod provider;
mod subscription;

pub use error::PushError;
pub use provider::{
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TTL, VapidConfig, WebPushProvider, derive_public_key,
};
pub use subscription::parse_subscription;
