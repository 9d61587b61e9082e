//! ACI Session
//!
//! Answers "may this device unlock flight apps?".
//!
//! ```text
//!   attach ──> issue_nonce(device) ──> device signs {device_id, nonce, ts}
//!                                          │
//!   verify_handshake <─────────────────────┘
//!        │ ok                     detach
//!        v                          │
//!   FLIGHT_MODE ──────────────────> ON_DUTY
//! ```

pub mod registry;
pub mod session;

pub use registry::{RegistryError, TrustRegistry, TrustedDevice, UpsertOutcome};
pub use session::{Capabilities, DeviceSession, HandshakeAccepted, IssuedNonce, SessionPolicy};
