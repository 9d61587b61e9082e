//! # ACI Gatekeeper
//!
//! Answers "is a certified on-duty operator currently present?".
//!
//! ```text
//!   interval ──> poll_once ──GET /api/duty?nonce&aci_id──> FlyGate
//!                    │
//!                    │ six checks, fail closed
//!                    v
//!              AciLockState ──GateSignal──> Broadcaster ──> /ws observers
//! ```
//!
//! Events leave the gatekeeper only when the lock flips, or on a manual
//! override. Every other mutation is forwarded as a silent refresh so new
//! observers still get a current snapshot.

pub mod authority;
pub mod broadcaster;
pub mod gatekeeper;

pub use authority::{AuthorityError, DutyAuthority, HttpAuthority, DUTY_PATH};
pub use broadcaster::{Broadcaster, ObserverMessage, Subscription, OBSERVER_BUFFER};
pub use gatekeeper::{
    assertion_message, validate_assertion, GateSignal, Gatekeeper, GatekeeperSettings,
    DISABLED_REASON, MANUAL_LOCK_REASON,
};

/// Result type for aci-gatekeeper operations
pub type Result<T> = std::result::Result<T, AuthorityError>;
