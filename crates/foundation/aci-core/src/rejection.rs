//! Rejection reasons for both trust paths.
//!
//! Every public operation of the two state machines returns one of these on
//! failure instead of panicking or propagating an opaque error. All are
//! recoverable by retrying.

use serde::Serialize;

/// Why a device handshake (or nonce issuance) was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
pub enum HandshakeRejection {
    #[error("Unknown device_id")]
    UnknownDevice,

    #[error("No nonce issued")]
    NoNonceIssued,

    #[error("Invalid nonce")]
    InvalidNonce,

    #[error("Nonce expired")]
    NonceExpired,

    #[error("Device ID does not match the device the nonce was issued to")]
    DeviceMismatch,

    #[error("Timestamp outside the allowed window")]
    StaleTimestamp,

    #[error("Device not in trusted registry")]
    UntrustedDevice,

    #[error("Signature verification failed")]
    BadSignature,
}

impl HandshakeRejection {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::UnknownDevice => "UnknownDevice",
            Self::NoNonceIssued => "NoNonceIssued",
            Self::InvalidNonce => "InvalidNonce",
            Self::NonceExpired => "NonceExpired",
            Self::DeviceMismatch => "DeviceMismatch",
            Self::StaleTimestamp => "StaleTimestamp",
            Self::UntrustedDevice => "UntrustedDevice",
            Self::BadSignature => "BadSignature",
        }
    }
}

/// Why a poll cycle left the gatekeeper LOCKED.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
pub enum AssertionRejection {
    #[error("Nonce mismatch")]
    NonceMismatch,

    #[error("ACI ID mismatch")]
    AciIdMismatch,

    #[error("TTL expired")]
    TtlExpired,

    #[error("Assertion too old")]
    AssertionTooOld,

    #[error("Invalid HMAC signature")]
    InvalidSignature,

    #[error("Duty state is {0}, not ON_DUTY")]
    NotOnDuty(String),

    #[error("FlyGate unreachable: {0}")]
    AuthorityUnreachable(String),
}

impl AssertionRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonceMismatch => "NonceMismatch",
            Self::AciIdMismatch => "AciIdMismatch",
            Self::TtlExpired => "TtlExpired",
            Self::AssertionTooOld => "AssertionTooOld",
            Self::InvalidSignature => "InvalidSignature",
            Self::NotOnDuty(_) => "NotOnDuty",
            Self::AuthorityUnreachable(_) => "AuthorityUnreachable",
        }
    }

    /// True when the authority answered (reachability is unaffected).
    pub fn authority_answered(&self) -> bool {
        !matches!(self, Self::AuthorityUnreachable(_))
    }
}
