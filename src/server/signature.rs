//! HMAC-SHA256 verification for the `X-Hub-Signature-256` webhook header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify `header` (expected form `sha256=<hex>`) against an HMAC-SHA256 of
/// `body` computed with `secret`. Any deviation — missing prefix, bad hex,
/// wrong length, or a mismatching digest — returns `false`. The digest
/// comparison itself is constant-time via `Mac::verify_slice`.
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
