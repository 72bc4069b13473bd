//! Request signing for the terminal bridge
//!
//! The bridge accepts only HMAC-SHA256-signed requests. The signature is
//! computed over the JSON body using the shared API secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate the HMAC-SHA256 signature for a request body
///
/// # Example
///
/// ```
/// use anchor_trader::bridge::auth::sign_request;
///
/// let signature = sign_request(r#"{"symbol":"XAUUSD"}"#, "shared-secret");
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign_request(body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signature against the expected value
pub fn verify_signature(body: &str, secret: &str, signature: &str) -> bool {
    let computed = sign_request(body, secret);
    constant_time_eq(computed.as_bytes(), signature.as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Bridge credentials container
#[derive(Debug, Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Load credentials from `BRIDGE_API_KEY` and `BRIDGE_API_SECRET`
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let api_key = std::env::var("BRIDGE_API_KEY")?;
        let api_secret = std::env::var("BRIDGE_API_SECRET")?;
        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    /// Sign a request body with these credentials
    pub fn sign(&self, body: &str) -> String {
        sign_request(body, &self.api_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_64_hex_chars() {
        let signature = sign_request(r#"{"symbol":"XAUUSD"}"#, "test_secret");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signing_is_deterministic() {
        let body = r#"{"symbol":"XAUUSD","volume":0.5}"#;
        assert_eq!(sign_request(body, "s"), sign_request(body, "s"));
    }

    #[test]
    fn secret_and_body_both_matter() {
        let body = r#"{"symbol":"XAUUSD"}"#;
        assert_ne!(sign_request(body, "secret1"), sign_request(body, "secret2"));
        assert_ne!(
            sign_request(r#"{"symbol":"XAUUSD"}"#, "s"),
            sign_request(r#"{"symbol":"XAGUSD"}"#, "s")
        );
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let body = r#"{"symbol":"XAUUSD"}"#;
        let signature = sign_request(body, "secret");
        assert!(verify_signature(body, "secret", &signature));
        assert!(!verify_signature(body, "other", &signature));
        assert!(!verify_signature(body, "secret", "not-a-signature"));
    }

    #[test]
    fn credentials_sign_delegates_to_secret() {
        let creds = Credentials::new("key", "secret");
        assert_eq!(creds.api_key(), "key");
        assert_eq!(creds.sign("body"), sign_request("body", "secret"));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"diff"));
        assert!(!constant_time_eq(b"long", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn empty_body_still_signs() {
        let signature = sign_request("", "secret");
        assert_eq!(signature.len(), 64);
    }
}
