//! Ed25519 device signatures.
//!
//! Key material arrives either as SPKI PEM or as base64 holding a raw 32-byte
//! key or an SPKI DER blob. Signatures are standard base64 over the canonical
//! payload bytes and are checked with `verify_strict`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Signer, PUBLIC_KEY_LENGTH};
use serde::Serialize;

pub use ed25519_dalek::{SigningKey, VerifyingKey};

use crate::canonical::canonical_bytes;
use crate::{CryptoError, Result};

/// Parse an SPKI PEM public key.
pub fn parse_public_key_pem(pem: &str) -> Result<VerifyingKey> {
    VerifyingKey::from_public_key_pem(pem.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse base64 key material: raw 32 bytes or SPKI DER.
pub fn parse_public_key_base64(encoded: &str) -> Result<VerifyingKey> {
    let bytes = STANDARD.decode(encoded.trim())?;
    if bytes.len() == PUBLIC_KEY_LENGTH {
        let mut raw = [0u8; PUBLIC_KEY_LENGTH];
        raw.copy_from_slice(&bytes);
        return VerifyingKey::from_bytes(&raw).map_err(|e| CryptoError::InvalidKey(e.to_string()));
    }
    VerifyingKey::from_public_key_der(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Parse key material in either supported form, sniffing PEM armour.
pub fn parse_public_key(material: &str) -> Result<VerifyingKey> {
    if material.contains("-----BEGIN") {
        parse_public_key_pem(material)
    } else {
        parse_public_key_base64(material)
    }
}

/// Raw key as standard base64 (the `public_key_base64` registration form).
pub fn encode_public_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Verify a base64 signature over `message`.
pub fn verify_signature(key: &VerifyingKey, message: &[u8], signature_b64: &str) -> Result<()> {
    let raw = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    let signature =
        Signature::from_slice(&raw).map_err(|e| CryptoError::MalformedSignature(e.to_string()))?;
    key.verify_strict(message, &signature)
        .map_err(|_| CryptoError::SignatureMismatch)
}

/// Device side: sign the canonical encoding of `payload`, returning base64.
pub fn sign_canonical<T: Serialize>(key: &SigningKey, payload: &T) -> Result<String> {
    let message = canonical_bytes(payload)?;
    Ok(STANDARD.encode(key.sign(&message).to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aci_core::HandshakePayload;
    use ed25519_dalek::pkcs8::EncodePublicKey;

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    fn payload() -> HandshakePayload {
        HandshakePayload {
            nonce: "n-1".into(),
            timestamp_seconds: 1_700_000_000,
            device_id: "FlyGateAgent-iPad-0001".into(),
        }
    }

    #[test]
    fn signed_payload_verifies() {
        let sk = key();
        let sig = sign_canonical(&sk, &payload()).unwrap();
        let msg = canonical_bytes(&payload()).unwrap();
        assert!(verify_signature(&sk.verifying_key(), &msg, &sig).is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let sk = key();
        let sig = sign_canonical(&sk, &payload()).unwrap();
        let mut other = payload();
        other.timestamp_seconds += 1;
        let msg = canonical_bytes(&other).unwrap();
        assert!(matches!(
            verify_signature(&sk.verifying_key(), &msg, &sig),
            Err(CryptoError::SignatureMismatch)
        ));
    }

    #[test]
    fn garbage_signature_is_malformed() {
        let vk = key().verifying_key();
        assert!(matches!(
            verify_signature(&vk, b"x", "not base64!!"),
            Err(CryptoError::MalformedSignature(_))
        ));
        assert!(matches!(
            verify_signature(&vk, b"x", "AAAA"),
            Err(CryptoError::MalformedSignature(_))
        ));
    }

    #[test]
    fn raw_base64_key_parses() {
        let vk = key().verifying_key();
        let parsed = parse_public_key_base64(&encode_public_key(&vk)).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn pem_and_der_keys_parse() {
        let vk = key().verifying_key();
        let pem = vk.to_public_key_pem(Default::default()).unwrap();
        assert_eq!(parse_public_key_pem(&pem).unwrap(), vk);

        let der = vk.to_public_key_der().unwrap();
        let parsed = parse_public_key_base64(&STANDARD.encode(der.as_bytes())).unwrap();
        assert_eq!(parsed, vk);
    }

    #[test]
    fn sniffing_picks_the_right_parser() {
        let vk = key().verifying_key();
        let pem = vk.to_public_key_pem(Default::default()).unwrap();
        assert_eq!(parse_public_key(&pem).unwrap(), vk);
        assert_eq!(parse_public_key(&encode_public_key(&vk)).unwrap(), vk);
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(parse_public_key_base64(&STANDARD.encode([1u8; 16])).is_err());
    }
}
