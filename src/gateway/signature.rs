//! Checkout signature check: `hex(HMAC-SHA256(secret, order_id + "|" + payment_id))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, order_id: &str, payment_id: &str) -> AppResult<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("HMAC error: {}", e)))?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(mac)
}

pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> AppResult<String> {
    Ok(hex::encode(mac(secret, order_id, payment_id)?.finalize().into_bytes()))
}

/// Constant-time comparison against the hex signature supplied by the client.
pub fn verify(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> AppResult<bool> {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return Ok(false);
    };
    Ok(mac(secret, order_id, payment_id)?.verify_slice(&expected).is_ok())
}
