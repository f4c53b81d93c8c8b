//! VAPID-signed Web Push provider.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use reqwest::Client;
use reqwest::StatusCode;
use tracing::{debug, info};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage,
    WebPushMessageBuilder,
};

use notewise_reminders::{DeliveryError, PushProvider};

use crate::{PushError, parse_subscription};

/// Default time-to-live the push service keeps an undelivered message (one day).
pub const DEFAULT_TTL: u32 = 86_400;

/// Default bound on one HTTP request to a push service.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum length of a rejection body kept in error messages.
const MAX_REASON_CHARS: usize = 200;

/// Sender identity and key material for VAPID.
#[derive(Clone)]
pub struct VapidConfig {
    /// Contact URI for the push service operator (`mailto:` or `https:`).
    pub subject: String,
    /// PEM-encoded P-256 private key.
    pub private_key_pem: Vec<u8>,
    /// Base64url application server key; checked against the private key if set.
    pub public_key: Option<String>,
    /// How long the push service may hold an undelivered message, in seconds.
    pub ttl: u32,
    /// Bound on one HTTP request.
    pub request_timeout: Duration,
}

impl VapidConfig {
    pub fn new(subject: impl Into<String>, private_key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            private_key_pem: private_key_pem.into(),
            public_key: None,
            ttl: DEFAULT_TTL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load the private key from a PEM file.
    pub async fn from_pem_file(
        subject: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<Self, PushError> {
        let pem = tokio::fs::read(path.as_ref()).await?;
        Ok(Self::new(subject, pem))
    }

    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Base64url (unpadded) application server key for a PEM private key.
pub fn derive_public_key(private_key_pem: &[u8]) -> Result<String, PushError> {
    let partial = VapidSignatureBuilder::from_pem_no_sub(private_key_pem)
        .map_err(|e| PushError::InvalidKey(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(partial.get_public_key()))
}

/// Decode a public key written in either base64 alphabet, padded or not.
fn decode_public_key(key: &str) -> Option<Vec<u8>> {
    let key = key.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(key)
        .or_else(|_| STANDARD_NO_PAD.decode(key))
        .ok()
}

/// Web Push provider, configured once per process.
pub struct WebPushProvider {
    http: Client,
    subject: String,
    private_key_pem: Vec<u8>,
    public_key: String,
    ttl: u32,
    request_timeout: Duration,
}

impl WebPushProvider {
    /// Validate the VAPID configuration and build the provider.
    ///
    /// Must succeed before the reminder scheduler starts; a provider that
    /// cannot sign would fail every delivery.
    pub fn initialize(config: VapidConfig) -> Result<Self, PushError> {
        let subject = config.subject.trim().to_string();
        if !(subject.starts_with("mailto:") || subject.starts_with("https://")) {
            return Err(PushError::InvalidSubject(subject));
        }

        let public_key = derive_public_key(&config.private_key_pem)?;
        if let Some(configured) = config.public_key.as_deref()
            && decode_public_key(configured) != decode_public_key(&public_key)
        {
            return Err(PushError::KeyMismatch {
                configured: configured.trim().to_string(),
                derived: public_key,
            });
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(config.request_timeout)
            .build()?;

        info!(
            subject = %subject,
            public_key = %format!("{}...", public_key.chars().take(10).collect::<String>()),
            ttl = config.ttl,
            "push provider initialized"
        );

        Ok(Self {
            http,
            subject,
            private_key_pem: config.private_key_pem,
            public_key,
            ttl: config.ttl,
            request_timeout: config.request_timeout,
        })
    }

    /// The application server key browsers subscribe with.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign and encrypt `payload` for one subscription.
    fn build_message(
        &self,
        subscription: &SubscriptionInfo,
        payload: &[u8],
    ) -> Result<WebPushMessage, PushError> {
        let mut signature =
            VapidSignatureBuilder::from_pem(self.private_key_pem.as_slice(), subscription)?;
        signature.add_claim("sub", self.subject.as_str());

        let mut builder = WebPushMessageBuilder::new(subscription);
        builder.set_ttl(self.ttl);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature.build()?);

        Ok(builder.build()?)
    }

    /// Deliver `payload` to the endpoint of `subscription`.
    pub async fn deliver(&self, subscription: &str, payload: &str) -> Result<(), PushError> {
        let info = parse_subscription(subscription)?;
        let message = self.build_message(&info, payload.as_bytes())?;

        let mut request = self
            .http
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        if let Some(body) = message.payload {
            for (name, value) in &body.crypto_headers {
                request = request.header(*name, value.as_str());
            }
            request = request
                .header("Content-Encoding", "aes128gcm")
                .header("Content-Type", "application/octet-stream")
                .body(body.content);
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(endpoint = %info.endpoint, status = %status, "push service responded");

        if status.is_success() {
            return Ok(());
        }

        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::Gone {
                status: status.as_u16(),
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after_secs = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse().ok());
                Err(PushError::RateLimited { retry_after_secs })
            }
            StatusCode::PAYLOAD_TOO_LARGE => Err(PushError::Rejected {
                status: status.as_u16(),
                reason: "payload too large".to_string(),
            }),
            _ => {
                let text = response.text().await.unwrap_or_default();
                let reason = if text.trim().is_empty() {
                    status
                        .canonical_reason()
                        .unwrap_or("unknown error")
                        .to_string()
                } else {
                    text.trim().chars().take(MAX_REASON_CHARS).collect()
                };
                Err(PushError::Rejected {
                    status: status.as_u16(),
                    reason,
                })
            }
        }
    }

    fn delivery_error(&self, err: PushError) -> DeliveryError {
        match err {
            PushError::InvalidSubscription(reason) => DeliveryError::InvalidSubscription(reason),
            PushError::Gone { status } => DeliveryError::Gone { status },
            PushError::RateLimited { retry_after_secs } => {
                DeliveryError::RateLimited { retry_after_secs }
            }
            PushError::Rejected { status, reason } => DeliveryError::Rejected { status, reason },
            PushError::Http(e) if e.is_timeout() => DeliveryError::Timeout(self.request_timeout),
            other => DeliveryError::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl PushProvider for WebPushProvider {
    async fn send(&self, subscription: &str, payload: &str) -> Result<(), DeliveryError> {
        self.deliver(subscription, payload)
            .await
            .map_err(|e| self.delivery_error(e))
    }
}
