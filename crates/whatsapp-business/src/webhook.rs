//! Webhook authenticity checks.

use {
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Verify the webhook signature from WhatsApp.
///
/// The signature is sent in the `X-Hub-Signature-256` header as `sha256=<hex>`.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        warn!("invalid signature header format (missing sha256= prefix)");
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        warn!("signature header is not valid hex");
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        warn!("failed to create HMAC");
        return false;
    };
    mac.update(body);
    // verify_slice compares in constant time.
    mac.verify_slice(&expected).is_ok()
}

/// Verify webhook subscription (GET request).
///
/// WhatsApp sends a GET request with:
/// - `hub.mode=subscribe`
/// - `hub.verify_token=<your_verify_token>`
/// - `hub.challenge=<random_string>`
///
/// Returns `Some(challenge)` if verification succeeds.
pub fn verify_webhook_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    verify_token: &str,
) -> Option<String> {
    let (mode, token, challenge) = (mode?, token?, challenge?);
    if verify_token.is_empty() {
        return None;
    }
    (mode == "subscribe" && token == verify_token).then(|| challenge.to_string())
}
