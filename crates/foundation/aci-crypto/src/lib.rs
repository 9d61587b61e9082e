//! # ACI Crypto
//!
//! Stateless primitives shared by both trust paths:
//!
//! - **canonical**: sorted-key, whitespace-free JSON -- the bytes a companion
//!   device signs and the console verifies
//! - **signature**: Ed25519 key parsing and verification
//! - **mac**: HMAC-SHA256 over `|`-delimited duty assertion fields
//! - **nonce**: URL-safe random challenge tokens

pub mod canonical;
pub mod mac;
pub mod nonce;
pub mod signature;

pub use canonical::{canonical_bytes, canonical_json};
pub use mac::{delimited, hmac_sha256_base64, verify_hmac_base64, FIELD_DELIMITER};
pub use nonce::{generate_nonce, generate_nonce_with, NONCE_BYTES};
pub use signature::{
    encode_public_key, parse_public_key, parse_public_key_base64, parse_public_key_pem,
    sign_canonical, verify_signature, SigningKey, VerifyingKey,
};

/// Result type for aci-crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    #[error("Invalid signature encoding: {0}")]
    MalformedSignature(String),

    #[error("Signature does not match")]
    SignatureMismatch,

    #[error("Invalid MAC key")]
    InvalidMacKey,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
