//! Browser push subscription parsing.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use web_push::SubscriptionInfo;

use crate::PushError;

/// Length of an uncompressed P-256 public key.
const P256_POINT_LEN: usize = 65;

/// Length of the subscription auth secret.
const AUTH_SECRET_LEN: usize = 16;

/// Parse and validate a serialized browser `PushSubscription`.
///
/// Unknown fields such as `expirationTime` are ignored.
pub fn parse_subscription(blob: &str) -> Result<SubscriptionInfo, PushError> {
    let info: SubscriptionInfo = serde_json::from_str(blob)
        .map_err(|e| PushError::InvalidSubscription(format!("not a push subscription: {}", e)))?;

    if !(info.endpoint.starts_with("https://") || info.endpoint.starts_with("http://")) {
        return Err(PushError::InvalidSubscription(format!(
            "endpoint is not an HTTP URL: {}",
            info.endpoint
        )));
    }

    let p256dh = decode_key("p256dh", &info.keys.p256dh)?;
    if p256dh.len() != P256_POINT_LEN || p256dh[0] != 0x04 {
        return Err(PushError::InvalidSubscription(
            "p256dh is not an uncompressed P-256 public key".to_string(),
        ));
    }

    let auth = decode_key("auth", &info.keys.auth)?;
    if auth.len() != AUTH_SECRET_LEN {
        return Err(PushError::InvalidSubscription(format!(
            "auth secret must be {} bytes, got {}",
            AUTH_SECRET_LEN,
            auth.len()
        )));
    }

    Ok(info)
}

fn decode_key(name: &str, value: &str) -> Result<Vec<u8>, PushError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| PushError::InvalidSubscription(format!("{} is not base64url: {}", name, e)))
}
