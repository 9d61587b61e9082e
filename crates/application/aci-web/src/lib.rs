//! # ACI Web
//!
//! HTTP boundary for the trust core. Handlers translate JSON requests into
//! state machine calls and rejections into `{"error", "reason"}` bodies.
//!
//! - `/api/aci/*`: device session, registry, nonce + handshake
//! - `/api/gatekeeper/*`: lock state and manual overrides
//! - `/ws`: lock state stream

pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{ApiError, StartupError};
pub use routes::{print_routes, ROUTES};
pub use state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::router())
        .merge(routes::aci::router(state.config.session.enable_simulation))
        .merge(routes::gatekeeper::router())
        .merge(routes::ws::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(state: Arc<AppState>, addr: &str, shutdown: F) -> Result<(), StartupError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    tracing::info!("ACI console listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(StartupError::Serve)
}
