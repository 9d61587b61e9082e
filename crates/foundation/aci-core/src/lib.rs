//! # ACI Core
//!
//! Shared vocabulary for the Aviation Control Interface trust core.
//!
//! ```text
//!   companion device ──handshake──> DeviceSessionState   (may flight apps unlock?)
//!   FlyGate authority ──assertion─> AciLockState         (is an on-duty operator present?)
//! ```
//!
//! The two state machines live in `aci-session` and `aci-gatekeeper`; this crate
//! only holds the data they own and the reasons they reject input with.

pub mod capability;
pub mod clock;
pub mod rejection;
pub mod state;

pub use capability::{app_ids_for, catalog_for, AppCapability, FLIGHT_APPS, GROUND_APPS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use rejection::{AssertionRejection, HandshakeRejection};
pub use state::{
    AciLockState, AuthorityStatus, DeviceSessionState, DutyAssertion, DutyState, DutyUser,
    HandshakePayload, LockState,
};

/// Result type for aci-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while interpreting core vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Unknown duty state: {0}")]
    UnknownDutyState(String),
}
