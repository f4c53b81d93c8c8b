//! Error types for Web Push delivery.

use thiserror::Error;

/// Errors that can occur when configuring or using the push provider.
#[derive(Debug, Error)]
pub enum PushError {
    /// VAPID subject is not a `mailto:` or `https:` URI.
    #[error("invalid VAPID subject '{0}': expected a mailto: or https: URI")]
    InvalidSubject(String),

    /// VAPID private key could not be loaded.
    #[error("invalid VAPID private key: {0}")]
    InvalidKey(String),

    /// Configured public key does not belong to the private key.
    #[error("VAPID public key mismatch: configured {configured}, private key gives {derived}")]
    KeyMismatch { configured: String, derived: String },

    /// Subscription blob is malformed.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// I/O error reading key material.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Message signing or encryption failed.
    #[error("web push error: {0}")]
    WebPush(#[from] web_push::WebPushError),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Subscription expired or was removed by the user.
    #[error("subscription is gone (HTTP {status})")]
    Gone { status: u16 },

    /// Rate limited by the push service.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited { retry_after_secs: Option<u64> },

    /// Push service rejected the message.
    #[error("push service rejected message (HTTP {status}): {reason}")]
    Rejected { status: u16, reason: String },
}
