//! Random challenge tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Default entropy per nonce.
pub const NONCE_BYTES: usize = 24;

/// A fresh URL-safe nonce with `NONCE_BYTES` of OS entropy.
pub fn generate_nonce() -> String {
    generate_nonce_with(NONCE_BYTES)
}

pub fn generate_nonce_with(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
