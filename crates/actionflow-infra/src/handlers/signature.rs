//! HMAC-SHA256 request signing for outbound webhooks.
//!
//! Receivers recompute `HMAC-SHA256(secret, body)` and compare it with the
//! `X-Actionflow-Signature: sha256=<hex>` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Actionflow-Signature";
pub const TASK_ID_HEADER: &str = "X-Actionflow-Task-Id";

/// Header value (`sha256=<hex>`) signing `body` with `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(body);
    Ok(format!("sha256={}", hex_encode(&mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` (or bare hex) header value in constant time.
#[cfg(test)]
pub(crate) fn verify(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex_decode(hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ()))
        .collect()
}
