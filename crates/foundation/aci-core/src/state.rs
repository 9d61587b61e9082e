//! Singletons owned by the two state machines, plus the assertion payload
//! received from the duty authority.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::app_ids_for;
use crate::Error;

/// Duty state of the console. Governs which capability set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DutyState {
    OffDuty,
    OnDuty,
    FlightMode,
}

impl DutyState {
    pub fn as_str(self) -> &'static str {
        match self {
            DutyState::OffDuty => "OFF_DUTY",
            DutyState::OnDuty => "ON_DUTY",
            DutyState::FlightMode => "FLIGHT_MODE",
        }
    }
}

impl fmt::Display for DutyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DutyState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF_DUTY" => Ok(DutyState::OffDuty),
            "ON_DUTY" => Ok(DutyState::OnDuty),
            "FLIGHT_MODE" => Ok(DutyState::FlightMode),
            other => Err(Error::UnknownDutyState(other.to_string())),
        }
    }
}

/// Gatekeeper lock state. LOCKED is the fail-closed default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockState {
    #[default]
    Locked,
    Unlocked,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockState::Locked => f.write_str("LOCKED"),
            LockState::Unlocked => f.write_str("UNLOCKED"),
        }
    }
}

/// Process-wide device session snapshot.
///
/// Invariants held by every constructor and transition below:
/// - `attached_device_id.is_some()` iff `duty_state == FlightMode`
/// - `active_app_ids == app_ids_for(duty_state)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSessionState {
    pub duty_state: DutyState,
    pub attached_device_id: Option<String>,
    pub attached_device_name: Option<String>,
    pub last_transition_time: DateTime<Utc>,
    pub active_app_ids: Vec<String>,
    pub last_handshake_ok: bool,
    pub last_error: Option<String>,
}

impl DeviceSessionState {
    /// Initial state: ON_DUTY with the ground capability set.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            duty_state: DutyState::OnDuty,
            attached_device_id: None,
            attached_device_name: None,
            last_transition_time: now,
            active_app_ids: app_ids_for(DutyState::OnDuty),
            last_handshake_ok: false,
            last_error: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached_device_id.is_some()
    }

    pub fn enter_flight_mode(&mut self, device_id: &str, device_name: &str, now: DateTime<Utc>) {
        self.duty_state = DutyState::FlightMode;
        self.attached_device_id = Some(device_id.to_string());
        self.attached_device_name = Some(device_name.to_string());
        self.active_app_ids = app_ids_for(DutyState::FlightMode);
        self.last_transition_time = now;
        self.last_handshake_ok = true;
        self.last_error = None;
    }

    /// Detach and fall back to ON_DUTY. Repeating it is a no-op.
    pub fn return_on_duty(&mut self, now: DateTime<Utc>) {
        if self.duty_state != DutyState::OnDuty {
            self.last_transition_time = now;
        }
        self.duty_state = DutyState::OnDuty;
        self.attached_device_id = None;
        self.attached_device_name = None;
        self.active_app_ids = app_ids_for(DutyState::OnDuty);
        self.last_handshake_ok = false;
        self.last_error = None;
    }

    pub fn record_failure(&mut self, reason: impl fmt::Display) {
        self.last_handshake_ok = false;
        self.last_error = Some(reason.to_string());
    }

    /// Checks both structural invariants.
    pub fn is_consistent(&self) -> bool {
        let attachment_matches = self.attached_device_id.is_some()
            == (self.duty_state == DutyState::FlightMode);
        attachment_matches && self.active_app_ids == app_ids_for(self.duty_state)
    }
}

/// Reachability of the external duty authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityStatus {
    pub reachable: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Gatekeeper singleton, pushed verbatim to realtime observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AciLockState {
    pub aci_id: String,
    pub lock_state: LockState,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(rename = "flygate")]
    pub authority: AuthorityStatus,
}

impl AciLockState {
    pub fn locked(aci_id: impl Into<String>) -> Self {
        Self {
            aci_id: aci_id.into(),
            lock_state: LockState::Locked,
            last_verified_at: None,
            last_error: None,
            authority: AuthorityStatus::default(),
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock_state == LockState::Unlocked
    }
}

/// Body a companion device signs during the handshake. Wire names are
/// `nonce`, `ts` and `device_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub nonce: String,
    #[serde(rename = "ts")]
    pub timestamp_seconds: i64,
    pub device_id: String,
}

/// Crew member named in a duty assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyUser {
    pub id: String,
    pub role: String,
}

/// Signed claim from the duty authority. Validated and dropped every poll.
///
/// `issued_at` and `duty_state` stay as the raw strings received; the HMAC is
/// computed over exactly those bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyAssertion {
    pub aci_id: String,
    pub nonce: String,
    pub issued_at: String,
    pub ttl_seconds: i64,
    pub device_id: String,
    pub user: DutyUser,
    pub duty_state: String,
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn initial_state_is_on_duty_and_consistent() {
        let state = DeviceSessionState::initial(t0());
        assert_eq!(state.duty_state, DutyState::OnDuty);
        assert!(!state.is_attached());
        assert!(state.is_consistent());
    }

    #[test]
    fn flight_mode_transition_keeps_invariants() {
        let mut state = DeviceSessionState::initial(t0());
        state.record_failure("Invalid nonce");
        state.enter_flight_mode("D1", "Pilot iPad", t0());
        assert_eq!(state.duty_state, DutyState::FlightMode);
        assert!(state.last_handshake_ok);
        assert!(state.last_error.is_none());
        assert!(state.is_consistent());

        state.return_on_duty(t0());
        assert!(!state.is_attached());
        assert!(!state.last_handshake_ok);
        assert!(state.is_consistent());
    }

    #[test]
    fn duty_state_round_trips_through_str() {
        for s in [DutyState::OffDuty, DutyState::OnDuty, DutyState::FlightMode] {
            assert_eq!(s.as_str().parse::<DutyState>(), Ok(s));
        }
        assert!("on_duty".parse::<DutyState>().is_err());
    }

    #[test]
    fn lock_state_serializes_uppercase_under_flygate_key() {
        let state = AciLockState::locked("aci-1");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lock_state"], "LOCKED");
        assert_eq!(json["flygate"]["reachable"], false);
    }

    #[test]
    fn session_state_serializes_camel_case() {
        let json = serde_json::to_value(DeviceSessionState::initial(t0())).unwrap();
        assert_eq!(json["dutyState"], "ON_DUTY");
        assert!(json["activeAppIds"].is_array());
        assert!(json["attachedDeviceId"].is_null());
    }
}
