//! Route definitions for the ACI boundary

pub mod aci;
pub mod gatekeeper;
pub mod health;
pub mod ws;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::ApiError;

/// All routes defined in the application
pub const ROUTES: &[(&str, &str, &str)] = &[
    ("GET", "/api/aci/health", "Liveness check"),
    ("GET", "/api/aci/status", "Device session snapshot"),
    ("GET", "/api/aci/capabilities", "Active app catalog"),
    ("GET", "/api/aci/devices", "Trusted devices"),
    ("POST", "/api/aci/devices/register", "Register or update a trusted device"),
    ("GET", "/api/aci/nonce", "Issue a handshake nonce (?device_id=)"),
    ("POST", "/api/aci/handshake", "Verify a signed handshake"),
    ("POST", "/api/aci/usb/attached/:device_id", "Device attached"),
    ("POST", "/api/aci/usb/detached", "Device detached"),
    ("POST", "/api/aci/simulate/attach/:device_id", "Debug attach (ACI_ENABLE_SIMULATION)"),
    ("POST", "/api/aci/simulate/detach", "Debug detach (ACI_ENABLE_SIMULATION)"),
    ("GET", "/api/gatekeeper/state", "Lock state snapshot"),
    ("GET", "/api/gatekeeper/config", "Gatekeeper configuration"),
    ("POST", "/api/gatekeeper/unlock", "Manual unlock"),
    ("POST", "/api/gatekeeper/lock", "Manual lock"),
    ("GET", "/ws", "Realtime lock state stream"),
];

/// Print all routes
pub fn print_routes() {
    println!("\nACI Console Routes:");
    println!("{:-<72}", "");
    for (method, path, desc) in ROUTES {
        println!("{:6} {:40} {}", method, path, desc);
    }
    println!();
}

/// Turn an extractor rejection into the common error body.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}
