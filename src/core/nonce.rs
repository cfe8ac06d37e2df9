//! State Nonce
//!
//! Random state parameter for correlating an authorization request with its callback.

use base64::Engine;
use rand::Rng;

/// Generate a 32-byte URL-safe state nonce.
pub fn generate_state_nonce() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
