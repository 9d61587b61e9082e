use std::sync::Arc;

use aci_config::AciConfig;
use aci_core::{Clock, SystemClock};
use aci_gatekeeper::{Broadcaster, DutyAuthority, Gatekeeper, GatekeeperSettings, HttpAuthority};
use aci_session::{DeviceSession, SessionPolicy, TrustRegistry};

use crate::error::StartupError;

/// Shared application state
pub struct AppState {
    pub config: AciConfig,
    pub registry: Arc<TrustRegistry>,
    pub session: DeviceSession,
    pub gatekeeper: Arc<Gatekeeper>,
    pub broadcaster: Arc<Broadcaster>,
}

impl AppState {
    /// Production wiring: FlyGate over HTTP and the system clock.
    pub async fn from_config(config: AciConfig) -> Result<Arc<Self>, StartupError> {
        let authority = HttpAuthority::new(
            &config.authority.base_url,
            config.authority.request_timeout(),
        )?;
        Self::with_parts(config, Arc::new(authority), Arc::new(SystemClock)).await
    }

    /// Build every component and start the broadcaster's fan-out task. The
    /// gatekeeper poller is left for the caller to start.
    pub async fn with_parts(
        config: AciConfig,
        authority: Arc<dyn DutyAuthority>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, StartupError> {
        let registry = Arc::new(TrustRegistry::from_seeds(&config.devices)?);
        if registry.is_empty().await {
            tracing::warn!("trusted registry is empty; handshakes fail until a device registers");
        } else {
            tracing::info!(devices = registry.len().await, "trusted registry seeded");
        }
        let session = DeviceSession::new(
            Arc::clone(&registry),
            Arc::clone(&clock),
            SessionPolicy::from(&config.session),
        );

        let (gatekeeper, signals) =
            Gatekeeper::new(GatekeeperSettings::from(&config), authority, clock);
        let gatekeeper = Arc::new(gatekeeper);

        let broadcaster = Arc::new(Broadcaster::new(gatekeeper.state().await));
        broadcaster.spawn(signals);

        Ok(Arc::new(Self {
            config,
            registry,
            session,
            gatekeeper,
            broadcaster,
        }))
    }
}
