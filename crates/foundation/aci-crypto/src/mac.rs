//! HMAC-SHA256 over delimited fields.
//!
//! The duty authority signs `f1|f2|...|fn` with the shared secret and sends the
//! tag as standard base64. Verification decodes the tag and compares in
//! constant time.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const FIELD_DELIMITER: &str = "|";

/// Join fields with the fixed delimiter.
pub fn delimited(fields: &[&str]) -> String {
    fields.join(FIELD_DELIMITER)
}

/// Compute the base64 HMAC-SHA256 tag for `message`.
pub fn hmac_sha256_base64(secret: &[u8], message: &[u8]) -> Result<String> {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret).map_err(|_| CryptoError::InvalidMacKey)?;
    mac.update(message);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a base64 tag. Undecodable tags are a mismatch.
pub fn verify_hmac_base64(secret: &[u8], message: &[u8], tag_b64: &str) -> bool {
    let Ok(tag) = STANDARD.decode(tag_b64) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimited_joins_in_order() {
        assert_eq!(delimited(&["aci", "n", "60"]), "aci|n|60");
    }

    #[test]
    fn tag_verifies_with_same_secret_only() {
        let msg = delimited(&["aci-1", "nonce", "2026-01-01T00:00:00Z", "60"]);
        let tag = hmac_sha256_base64(b"secret", msg.as_bytes()).unwrap();
        assert!(verify_hmac_base64(b"secret", msg.as_bytes(), &tag));
        assert!(!verify_hmac_base64(b"other", msg.as_bytes(), &tag));
        assert!(!verify_hmac_base64(b"secret", b"aci-1|nonce", &tag));
    }

    #[test]
    fn rfc4231_case_2() {
        // Key = "Jefe", data = "what do ya want for nothing?"
        let tag = hmac_sha256_base64(b"Jefe", b"what do ya want for nothing?").unwrap();
        let expected = STANDARD.encode([
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ]);
        assert_eq!(tag, expected);
    }

    #[test]
    fn undecodable_tag_is_rejected() {
        assert!(!verify_hmac_base64(b"secret", b"m", "%%%"));
    }
}
