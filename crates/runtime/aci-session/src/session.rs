//! Device Session State Machine
//!
//! Owns the `DeviceSessionState` singleton and the single outstanding nonce.
//! Every mutation goes through one guard; the registry guard is never held at
//! the same time.

use std::sync::Arc;

use aci_config::{SessionConfig, MAX_TTL_SECONDS};
use aci_core::{
    catalog_for, AppCapability, Clock, DeviceSessionState, DutyState, HandshakePayload,
    HandshakeRejection,
};
use aci_crypto::{canonical_bytes, generate_nonce, verify_signature};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::registry::TrustRegistry;

/// Knobs taken from `SessionConfig`.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub nonce_ttl: Duration,
    /// Treat registered devices without a verification key as untrusted.
    pub require_device_key: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            nonce_ttl: Duration::seconds(30),
            require_device_key: false,
        }
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            nonce_ttl: Duration::seconds(config.nonce_ttl_seconds.clamp(0, MAX_TTL_SECONDS)),
            require_device_key: config.require_device_key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNonce {
    pub nonce: String,
    pub ttl_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAccepted {
    pub device_id: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub duty_state: DutyState,
    pub apps: &'static [AppCapability],
}

#[derive(Debug, Clone)]
struct PendingNonce {
    value: String,
    issued_at: DateTime<Utc>,
    bound_device_id: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: DeviceSessionState,
    pending: Option<PendingNonce>,
}

#[derive(Debug)]
pub struct DeviceSession {
    registry: Arc<TrustRegistry>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    inner: Mutex<Inner>,
}

impl DeviceSession {
    pub fn new(registry: Arc<TrustRegistry>, clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        let state = DeviceSessionState::initial(clock.now());
        Self {
            registry,
            clock,
            policy,
            inner: Mutex::new(Inner { state, pending: None }),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<TrustRegistry> {
        &self.registry
    }

    /// Issue a fresh nonce, replacing any outstanding one.
    ///
    /// A supplied `device_id` must be registered and binds the nonce to it.
    pub async fn issue_nonce(
        &self,
        device_id: Option<&str>,
    ) -> Result<IssuedNonce, HandshakeRejection> {
        if let Some(id) = device_id {
            if self.registry.lookup(id).await.is_none() {
                tracing::warn!(device_id = id, "nonce requested for unknown device");
                return Err(HandshakeRejection::UnknownDevice);
            }
        }

        let value = generate_nonce();
        let mut inner = self.inner.lock().await;
        inner.pending = Some(PendingNonce {
            value: value.clone(),
            issued_at: self.clock.now(),
            bound_device_id: device_id.map(str::to_string),
        });
        tracing::debug!(bound = device_id.is_some(), "nonce issued");

        Ok(IssuedNonce {
            nonce: value,
            ttl_seconds: self.policy.nonce_ttl.num_seconds(),
        })
    }

    /// Check a signed handshake and enter FLIGHT_MODE on success.
    ///
    /// The first failing check decides the rejection, which is also recorded
    /// as `last_error` on the session state.
    pub async fn verify_handshake(
        &self,
        payload: &HandshakePayload,
        signature_b64: &str,
    ) -> Result<HandshakeAccepted, HandshakeRejection> {
        let issued_at = match self.check_pending(payload).await {
            Ok(issued_at) => issued_at,
            Err(rejection) => return Err(self.reject(&payload.device_id, rejection).await),
        };

        let device = match self.registry.lookup(&payload.device_id).await {
            Some(device) => device,
            None => {
                return Err(self
                    .reject(&payload.device_id, HandshakeRejection::UntrustedDevice)
                    .await)
            }
        };

        match &device.verification_key {
            Some(key) => {
                let verified = canonical_bytes(payload)
                    .map_err(|_| HandshakeRejection::BadSignature)
                    .and_then(|message| {
                        verify_signature(key, &message, signature_b64)
                            .map_err(|_| HandshakeRejection::BadSignature)
                    });
                if let Err(rejection) = verified {
                    return Err(self.reject(&payload.device_id, rejection).await);
                }
            }
            None if self.policy.require_device_key => {
                return Err(self
                    .reject(&payload.device_id, HandshakeRejection::UntrustedDevice)
                    .await)
            }
            None => {}
        }

        let mut inner = self.inner.lock().await;
        // Another request may have consumed or replaced the nonce meanwhile.
        let raced = match &inner.pending {
            None => Some(HandshakeRejection::NoNonceIssued),
            Some(p) if p.value != payload.nonce || p.issued_at != issued_at => {
                Some(HandshakeRejection::InvalidNonce)
            }
            Some(_) => None,
        };
        if let Some(rejection) = raced {
            inner.state.record_failure(rejection);
            return Err(rejection);
        }

        inner.pending = None;
        let now = self.clock.now();
        inner.state.enter_flight_mode(&device.device_id, &device.device_name, now);
        tracing::info!(
            device_id = %device.device_id,
            device_name = %device.device_name,
            "handshake accepted, entering FLIGHT_MODE"
        );

        Ok(HandshakeAccepted {
            device_id: device.device_id,
            device_name: device.device_name,
        })
    }

    /// Physical attachment: issue a nonce bound to the device. Duty state is
    /// unchanged until the handshake completes.
    pub async fn on_device_attached(
        &self,
        device_id: &str,
    ) -> Result<IssuedNonce, HandshakeRejection> {
        let issued = self.issue_nonce(Some(device_id)).await?;
        tracing::info!(device_id, "device attached, awaiting handshake");
        Ok(issued)
    }

    /// Drop any attachment and pending nonce and return to ON_DUTY.
    pub async fn on_device_detached(&self) -> DeviceSessionState {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let was_attached = inner.state.is_attached();
        inner.pending = None;
        inner.state.return_on_duty(now);
        if was_attached {
            tracing::info!("device detached, returning to ON_DUTY");
        }
        inner.state.clone()
    }

    /// Debug transition into FLIGHT_MODE with no nonce or signature.
    pub async fn simulate_attach(
        &self,
        device_id: &str,
    ) -> Result<DeviceSessionState, HandshakeRejection> {
        let device = self
            .registry
            .lookup(device_id)
            .await
            .ok_or(HandshakeRejection::UnknownDevice)?;

        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        inner.pending = None;
        inner.state.enter_flight_mode(&device.device_id, &device.device_name, now);
        tracing::warn!(device_id, "simulated attach");
        Ok(inner.state.clone())
    }

    pub async fn simulate_detach(&self) -> DeviceSessionState {
        tracing::warn!("simulated detach");
        self.on_device_detached().await
    }

    pub async fn status(&self) -> DeviceSessionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn capabilities(&self) -> Capabilities {
        let duty_state = self.inner.lock().await.state.duty_state;
        Capabilities {
            duty_state,
            apps: catalog_for(duty_state),
        }
    }

    /// Checks 1 to 5, all against the pending nonce. Returns the issue time
    /// of the nonce that passed, so it can be recognised again after the
    /// registry lookup.
    async fn check_pending(
        &self,
        payload: &HandshakePayload,
    ) -> Result<DateTime<Utc>, HandshakeRejection> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let pending = inner.pending.clone().ok_or(HandshakeRejection::NoNonceIssued)?;

        if pending.value != payload.nonce {
            return Err(HandshakeRejection::InvalidNonce);
        }

        if now - pending.issued_at > self.policy.nonce_ttl {
            inner.pending = None;
            return Err(HandshakeRejection::NonceExpired);
        }

        if let Some(bound) = &pending.bound_device_id {
            if bound != &payload.device_id {
                return Err(HandshakeRejection::DeviceMismatch);
            }
        }

        let skew = now.timestamp().abs_diff(payload.timestamp_seconds);
        if skew > self.policy.nonce_ttl.num_seconds().unsigned_abs() {
            return Err(HandshakeRejection::StaleTimestamp);
        }

        Ok(pending.issued_at)
    }

    async fn reject(&self, device_id: &str, rejection: HandshakeRejection) -> HandshakeRejection {
        tracing::warn!(device_id, reason = rejection.code(), "handshake rejected");
        self.inner.lock().await.state.record_failure(rejection);
        rejection
    }
}
