//! Gatekeeper
//!
//! Owns the `AciLockState` singleton. A single background task polls the duty
//! authority; manual overrides come in from request handlers. Both paths go
//! through the same guard, and signals are sent while it is held so observers
//! see transitions in the order they happened.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use aci_config::{AciConfig, MAX_TTL_SECONDS};
use aci_core::{AciLockState, AssertionRejection, Clock, DutyAssertion, DutyState, LockState};
use aci_crypto::{delimited, generate_nonce_with, verify_hmac_base64};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::authority::DutyAuthority;

pub const DISABLED_REASON: &str = "Gatekeeper disabled - no shared secret configured";
pub const MANUAL_LOCK_REASON: &str = "Manually locked";

const POLL_NONCE_BYTES: usize = 16;

/// What the gatekeeper tells the broadcaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateSignal {
    /// Lock flipped or was manually overridden. Observers are notified.
    StateChanged(AciLockState),
    /// Anything else changed. Only the snapshot is updated.
    Refreshed(AciLockState),
}

impl GateSignal {
    pub fn state(&self) -> &AciLockState {
        match self {
            GateSignal::StateChanged(s) | GateSignal::Refreshed(s) => s,
        }
    }
}

#[derive(Clone)]
pub struct GatekeeperSettings {
    pub aci_id: String,
    pub shared_secret: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub duty_ttl_max: chrono::Duration,
}

impl fmt::Debug for GatekeeperSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatekeeperSettings")
            .field("aci_id", &self.aci_id)
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("duty_ttl_max", &self.duty_ttl_max)
            .finish()
    }
}

impl From<&AciConfig> for GatekeeperSettings {
    fn from(config: &AciConfig) -> Self {
        Self {
            aci_id: config.aci_id.clone(),
            shared_secret: config.authority.shared_secret.clone().filter(|s| !s.is_empty()),
            poll_interval: config.authority.poll_interval(),
            request_timeout: config.authority.request_timeout(),
            duty_ttl_max: chrono::Duration::seconds(
                config.authority.duty_ttl_max_seconds.clamp(0, MAX_TTL_SECONDS),
            ),
        }
    }
}

impl GatekeeperSettings {
    pub fn is_enabled(&self) -> bool {
        self.shared_secret.is_some()
    }
}

/// The bytes FlyGate signs:
/// `aciId|nonce|issuedAt|ttlSeconds|deviceId|userId|userRole|dutyState`.
pub fn assertion_message(assertion: &DutyAssertion) -> String {
    let ttl = assertion.ttl_seconds.to_string();
    delimited(&[
        &assertion.aci_id,
        &assertion.nonce,
        &assertion.issued_at,
        &ttl,
        &assertion.device_id,
        &assertion.user.id,
        &assertion.user.role,
        &assertion.duty_state,
    ])
}

/// Run the six checks in order; the first failure wins.
pub fn validate_assertion(
    assertion: &DutyAssertion,
    expected_nonce: &str,
    aci_id: &str,
    secret: &[u8],
    ttl_ceiling: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<(), AssertionRejection> {
    if assertion.nonce != expected_nonce {
        return Err(AssertionRejection::NonceMismatch);
    }

    if assertion.aci_id != aci_id {
        return Err(AssertionRejection::AciIdMismatch);
    }

    // An issue time we cannot read is treated as already expired.
    let issued_at = DateTime::parse_from_rfc3339(&assertion.issued_at)
        .map_err(|_| AssertionRejection::TtlExpired)?
        .with_timezone(&Utc);
    let age = now - issued_at;

    // Negative or unrepresentable TTLs never validate.
    let ttl = chrono::Duration::try_seconds(assertion.ttl_seconds)
        .filter(|ttl| *ttl >= chrono::Duration::zero())
        .ok_or(AssertionRejection::TtlExpired)?;
    if age > ttl {
        return Err(AssertionRejection::TtlExpired);
    }

    if age > ttl_ceiling {
        return Err(AssertionRejection::AssertionTooOld);
    }

    let message = assertion_message(assertion);
    if !verify_hmac_base64(secret, message.as_bytes(), &assertion.signature) {
        return Err(AssertionRejection::InvalidSignature);
    }

    if assertion.duty_state != DutyState::OnDuty.as_str() {
        return Err(AssertionRejection::NotOnDuty(assertion.duty_state.clone()));
    }

    Ok(())
}

pub struct Gatekeeper {
    settings: GatekeeperSettings,
    authority: Arc<dyn DutyAuthority>,
    clock: Arc<dyn Clock>,
    state: Mutex<AciLockState>,
    signals: mpsc::UnboundedSender<GateSignal>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Gatekeeper {
    /// Build a gatekeeper and the receiving end of its signal channel.
    pub fn new(
        settings: GatekeeperSettings,
        authority: Arc<dyn DutyAuthority>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<GateSignal>) {
        let (signals, rx) = mpsc::unbounded_channel();
        let mut initial = AciLockState::locked(&settings.aci_id);
        if !settings.is_enabled() {
            initial.last_error = Some(DISABLED_REASON.to_string());
        }

        let gatekeeper = Self {
            settings,
            authority,
            clock,
            state: Mutex::new(initial),
            signals,
            poller: Mutex::new(None),
        };
        (gatekeeper, rx)
    }

    pub fn settings(&self) -> &GatekeeperSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.is_enabled()
    }

    pub async fn state(&self) -> AciLockState {
        self.state.lock().await.clone()
    }

    /// One poll cycle. Without a shared secret nothing is fetched and the
    /// state stays as it is.
    pub async fn poll_once(&self) -> AciLockState {
        let Some(secret) = self.settings.shared_secret.as_deref() else {
            return self.state().await;
        };

        let nonce = generate_nonce_with(POLL_NONCE_BYTES);
        let fetched = tokio::time::timeout(
            self.settings.request_timeout,
            self.authority.fetch_assertion(&nonce, &self.settings.aci_id),
        )
        .await;

        let now = self.clock.now();
        let outcome = match fetched {
            Ok(Ok(assertion)) => validate_assertion(
                &assertion,
                &nonce,
                &self.settings.aci_id,
                secret.as_bytes(),
                self.settings.duty_ttl_max,
                now,
            ),
            Ok(Err(e)) => Err(AssertionRejection::AuthorityUnreachable(e.to_string())),
            Err(_) => Err(AssertionRejection::AuthorityUnreachable(format!(
                "no response within {}ms",
                self.settings.request_timeout.as_millis()
            ))),
        };

        self.apply(outcome, now).await
    }

    async fn apply(
        &self,
        outcome: Result<(), AssertionRejection>,
        now: DateTime<Utc>,
    ) -> AciLockState {
        let mut state = self.state.lock().await;
        let previous = state.lock_state;

        let answered = match &outcome {
            Ok(()) => true,
            Err(rejection) => rejection.authority_answered(),
        };
        state.authority.reachable = answered;
        if answered {
            state.authority.last_seen_at = Some(now);
        }

        match outcome {
            Ok(()) => {
                state.lock_state = LockState::Unlocked;
                state.last_verified_at = Some(now);
                state.last_error = None;
            }
            Err(rejection) => {
                if previous == LockState::Unlocked {
                    tracing::warn!(reason = rejection.code(), "gatekeeper locking: {}", rejection);
                } else {
                    tracing::debug!(reason = rejection.code(), "poll rejected: {}", rejection);
                }
                state.lock_state = LockState::Locked;
                state.last_error = Some(rejection.to_string());
            }
        }

        let snapshot = state.clone();
        if snapshot.lock_state != previous {
            tracing::info!(lock_state = %snapshot.lock_state, "lock state changed");
            self.emit(GateSignal::StateChanged(snapshot.clone()));
        } else {
            self.emit(GateSignal::Refreshed(snapshot.clone()));
        }
        snapshot
    }

    /// Operator override to UNLOCKED. Always notifies observers.
    pub async fn manual_unlock(&self) -> AciLockState {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.lock_state = LockState::Unlocked;
        state.last_verified_at = Some(now);
        state.last_error = None;
        tracing::warn!("gatekeeper manually unlocked");

        let snapshot = state.clone();
        self.emit(GateSignal::StateChanged(snapshot.clone()));
        snapshot
    }

    /// Operator override to LOCKED. Always notifies observers.
    pub async fn manual_lock(&self, reason: Option<&str>) -> AciLockState {
        let reason = reason.unwrap_or(MANUAL_LOCK_REASON);
        let mut state = self.state.lock().await;
        state.lock_state = LockState::Locked;
        state.last_error = Some(reason.to_string());
        tracing::info!(reason, "gatekeeper manually locked");

        let snapshot = state.clone();
        self.emit(GateSignal::StateChanged(snapshot.clone()));
        snapshot
    }

    /// Spawn the poll task. Returns false when disabled; a second call while
    /// running is a no-op.
    pub async fn start(self: &Arc<Self>) -> bool {
        if !self.is_enabled() {
            tracing::warn!("{}", DISABLED_REASON);
            return false;
        }

        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }

        let gatekeeper = Arc::clone(self);
        let period = self.settings.poll_interval;
        *poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                gatekeeper.poll_once().await;
            }
        }));

        tracing::info!(
            aci_id = %self.settings.aci_id,
            interval_ms = period.as_millis() as u64,
            "gatekeeper polling started"
        );
        true
    }

    /// Cancel the poll task. The lock state is left as it is.
    pub async fn stop(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
            tracing::info!("gatekeeper polling stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    fn emit(&self, signal: GateSignal) {
        // A dropped receiver only means nobody is listening.
        let _ = self.signals.send(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::AuthorityError;
    use aci_core::{DutyUser, ManualClock};
    use aci_crypto::hmac_sha256_base64;
    use async_trait::async_trait;

    const SECRET: &str = "test-secret";
    const ACI: &str = "aci-test";

    #[derive(Debug, Clone, Copy)]
    enum Reply {
        Signed { secret: &'static str, age_secs: i64, ttl: i64, duty: &'static str },
        WrongNonce,
        OtherAci,
        Down,
        Hang,
    }

    struct FakeAuthority {
        clock: Arc<ManualClock>,
        reply: std::sync::Mutex<Reply>,
    }

    impl FakeAuthority {
        fn set(&self, reply: Reply) {
            *self.reply.lock().unwrap() = reply;
        }
    }

    fn sign(mut a: DutyAssertion, secret: &str) -> DutyAssertion {
        let message = assertion_message(&a);
        a.signature = hmac_sha256_base64(secret.as_bytes(), message.as_bytes()).unwrap();
        a
    }

    fn assertion(nonce: &str, issued_at: DateTime<Utc>, duty: &str) -> DutyAssertion {
        DutyAssertion {
            aci_id: ACI.to_string(),
            nonce: nonce.to_string(),
            issued_at: issued_at.to_rfc3339(),
            ttl_seconds: 30,
            device_id: "FlyGateAgent-iPad-0001".to_string(),
            user: DutyUser { id: "u-1".into(), role: "PIC".into() },
            duty_state: duty.to_string(),
            signature: String::new(),
        }
    }

    #[async_trait]
    impl DutyAuthority for FakeAuthority {
        async fn fetch_assertion(
            &self,
            nonce: &str,
            _aci_id: &str,
        ) -> crate::Result<DutyAssertion> {
            let reply = *self.reply.lock().unwrap();
            let now = self.clock.now();
            match reply {
                Reply::Signed { secret, age_secs, ttl, duty } => {
                    let mut a = assertion(nonce, now - chrono::Duration::seconds(age_secs), duty);
                    a.ttl_seconds = ttl;
                    Ok(sign(a, secret))
                }
                Reply::WrongNonce => Ok(sign(assertion("stale", now, "ON_DUTY"), SECRET)),
                Reply::OtherAci => {
                    let mut a = assertion(nonce, now, "ON_DUTY");
                    a.aci_id = "aci-other".into();
                    Ok(sign(a, SECRET))
                }
                Reply::Down => Err(AuthorityError::Status(503)),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(AuthorityError::Transport("unreachable".into()))
                }
            }
        }
    }

    fn valid() -> Reply {
        Reply::Signed { secret: SECRET, age_secs: 1, ttl: 30, duty: "ON_DUTY" }
    }

    fn signed(age_secs: i64, ttl: i64) -> Reply {
        Reply::Signed { secret: SECRET, age_secs, ttl, duty: "ON_DUTY" }
    }

    fn settings(secret: Option<&str>) -> GatekeeperSettings {
        GatekeeperSettings {
            aci_id: ACI.to_string(),
            shared_secret: secret.map(str::to_string),
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(100),
            duty_ttl_max: chrono::Duration::seconds(60),
        }
    }

    fn setup(
        secret: Option<&str>,
        reply: Reply,
    ) -> (Arc<Gatekeeper>, Arc<FakeAuthority>, mpsc::UnboundedReceiver<GateSignal>) {
        let clock = Arc::new(ManualClock::at_epoch(1_772_000_000));
        let authority = Arc::new(FakeAuthority {
            clock: clock.clone(),
            reply: std::sync::Mutex::new(reply),
        });
        let (gk, rx) = Gatekeeper::new(settings(secret), authority.clone(), clock);
        (Arc::new(gk), authority, rx)
    }

    fn changes(rx: &mut mpsc::UnboundedReceiver<GateSignal>) -> usize {
        let mut n = 0;
        while let Ok(signal) = rx.try_recv() {
            if matches!(signal, GateSignal::StateChanged(_)) {
                n += 1;
            }
        }
        n
    }

    #[tokio::test]
    async fn valid_assertion_unlocks_and_emits_once() {
        let (gk, _, mut rx) = setup(Some(SECRET), valid());

        let state = gk.poll_once().await;
        assert_eq!(state.lock_state, LockState::Unlocked);
        assert!(state.last_verified_at.is_some());
        assert!(state.last_error.is_none());
        assert!(state.authority.reachable);
        assert_eq!(changes(&mut rx), 1);

        gk.poll_once().await;
        assert_eq!(changes(&mut rx), 0);
    }

    #[tokio::test]
    async fn wrong_secret_locks_but_authority_is_reachable() {
        let (gk, _, mut rx) = setup(
            Some(SECRET),
            Reply::Signed { secret: "other", age_secs: 1, ttl: 30, duty: "ON_DUTY" },
        );
        let state = gk.poll_once().await;
        assert_eq!(state.lock_state, LockState::Locked);
        assert_eq!(state.last_error.as_deref(), Some("Invalid HMAC signature"));
        assert!(state.authority.reachable);
        assert!(state.authority.last_seen_at.is_some());
        // LOCKED -> LOCKED is not a change.
        assert_eq!(changes(&mut rx), 0);
    }

    #[tokio::test]
    async fn each_failed_check_relocks() {
        let off_duty = Reply::Signed { secret: SECRET, age_secs: 1, ttl: 30, duty: "OFF_DUTY" };
        let forged = Reply::Signed { secret: "forged", age_secs: 1, ttl: 30, duty: "ON_DUTY" };
        let cases = [
            (Reply::WrongNonce, AssertionRejection::NonceMismatch),
            (Reply::OtherAci, AssertionRejection::AciIdMismatch),
            (signed(31, 30), AssertionRejection::TtlExpired),
            (signed(61, 120), AssertionRejection::AssertionTooOld),
            (forged, AssertionRejection::InvalidSignature),
            (off_duty, AssertionRejection::NotOnDuty("OFF_DUTY".into())),
            (Reply::Down, AssertionRejection::AuthorityUnreachable("HTTP 503".into())),
        ];

        for (reply, expected) in cases {
            let (gk, authority, mut rx) = setup(Some(SECRET), valid());
            gk.poll_once().await;
            assert!(gk.state().await.is_unlocked());

            authority.set(reply);
            let state = gk.poll_once().await;
            let expected = expected.to_string();
            assert_eq!(state.lock_state, LockState::Locked, "{expected}");
            assert_eq!(state.last_error.as_deref(), Some(expected.as_str()));
            assert_eq!(changes(&mut rx), 2);
        }
    }

    #[tokio::test]
    async fn hung_authority_times_out_as_unreachable() {
        let (gk, authority, _rx) = setup(Some(SECRET), valid());
        gk.poll_once().await;

        authority.set(Reply::Hang);
        let state = gk.poll_once().await;
        assert_eq!(state.lock_state, LockState::Locked);
        assert!(!state.authority.reachable);
        assert!(state.last_error.unwrap().contains("unreachable"));
        assert!(state.authority.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn missing_secret_stays_locked_and_never_starts() {
        let (gk, _, mut rx) = setup(None, valid());
        assert_eq!(gk.state().await.last_error.as_deref(), Some(DISABLED_REASON));

        let state = gk.poll_once().await;
        assert_eq!(state.lock_state, LockState::Locked);
        assert!(!gk.start().await);
        assert!(!gk.is_running().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn manual_overrides_always_emit() {
        let (gk, _, mut rx) = setup(None, valid());

        let state = gk.manual_lock(None).await;
        assert_eq!(state.last_error.as_deref(), Some(MANUAL_LOCK_REASON));
        let state = gk.manual_lock(Some("maintenance")).await;
        assert_eq!(state.last_error.as_deref(), Some("maintenance"));
        assert_eq!(changes(&mut rx), 2);

        let state = gk.manual_unlock().await;
        assert!(state.is_unlocked());
        assert!(state.last_verified_at.is_some());
        gk.manual_unlock().await;
        assert_eq!(changes(&mut rx), 2);
    }

    async fn wait_for(gk: &Gatekeeper, lock_state: LockState) -> bool {
        for _ in 0..50 {
            if gk.state().await.lock_state == lock_state {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn started_poller_unlocks_and_stop_keeps_state() {
        let (gk, _, _rx) = setup(Some(SECRET), valid());
        assert!(gk.start().await);
        assert!(gk.start().await);
        assert!(wait_for(&gk, LockState::Unlocked).await);

        gk.stop().await;
        assert!(!gk.is_running().await);
        assert!(gk.state().await.is_unlocked());
    }

    #[tokio::test]
    async fn out_of_range_ttl_locks_and_poller_survives() {
        let (gk, authority, _rx) = setup(Some(SECRET), valid());
        assert!(gk.start().await);

        for ttl in [i64::MAX, i64::MIN, -5] {
            authority.set(valid());
            assert!(wait_for(&gk, LockState::Unlocked).await, "ttl {ttl}");

            authority.set(signed(1, ttl));
            assert!(wait_for(&gk, LockState::Locked).await, "ttl {ttl}");
            assert_eq!(gk.state().await.last_error.as_deref(), Some("TTL expired"));
            assert!(gk.is_running().await, "ttl {ttl}");
        }
        gk.stop().await;
    }

    #[test]
    fn validation_order_and_ceiling() {
        let now = Utc::now();
        let a = sign(assertion("n", now - chrono::Duration::seconds(10), "ON_DUTY"), SECRET);
        let check = |a: &DutyAssertion, nonce: &str, aci: &str, ceiling: i64| {
            let ceiling = chrono::Duration::seconds(ceiling);
            validate_assertion(a, nonce, aci, SECRET.as_bytes(), ceiling, now)
        };

        assert_eq!(check(&a, "n", ACI, 60), Ok(()));
        assert_eq!(check(&a, "x", "other", 60), Err(AssertionRejection::NonceMismatch));
        assert_eq!(check(&a, "n", "other", 60), Err(AssertionRejection::AciIdMismatch));
        assert_eq!(check(&a, "n", ACI, 5), Err(AssertionRejection::AssertionTooOld));

        let mut unreadable = a.clone();
        unreadable.issued_at = "yesterday".into();
        assert_eq!(check(&unreadable, "n", ACI, 60), Err(AssertionRejection::TtlExpired));

        for ttl in [i64::MAX, i64::MIN, -1] {
            let mut huge = a.clone();
            huge.ttl_seconds = ttl;
            let huge = sign(huge, SECRET);
            assert_eq!(check(&huge, "n", ACI, 60), Err(AssertionRejection::TtlExpired), "{ttl}");
        }

        let mut tampered = a.clone();
        tampered.user.role = "FO".into();
        assert_eq!(check(&tampered, "n", ACI, 60), Err(AssertionRejection::InvalidSignature));
    }

    #[test]
    fn hmac_message_field_order() {
        let a = assertion("n", Utc::now(), "ON_DUTY");
        let msg = assertion_message(&a);
        assert!(msg.starts_with("aci-test|n|"));
        assert!(msg.ends_with("|30|FlyGateAgent-iPad-0001|u-1|PIC|ON_DUTY"));
    }

    #[test]
    fn settings_clamp_unchecked_ttl_ceiling() {
        let mut config = AciConfig::default();
        config.authority.duty_ttl_max_seconds = i64::MAX;
        let settings = GatekeeperSettings::from(&config);
        assert_eq!(settings.duty_ttl_max, chrono::Duration::seconds(MAX_TTL_SECONDS));
    }

    #[test]
    fn settings_debug_hides_secret() {
        let s = format!("{:?}", settings(Some(SECRET)));
        assert!(!s.contains(SECRET));
    }
}
