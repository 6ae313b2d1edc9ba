//! API Router configuration

use super::calls_handler::{dial, get_call_state, hangup, health_check, list_modems};
use super::metrics_handler::metrics_handler;
use super::ws_handler::signaling_ws;
use super::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router; `/metrics` is mounted only with a recorder handle
pub fn build_router(state: AppState, prometheus_handle: Option<PrometheusHandle>) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    let modem_routes = Router::new()
        .route("/modems", get(list_modems))
        .route("/modems/:iccid/call", get(get_call_state))
        .route("/modems/:iccid/call/dial", post(dial))
        .route("/modems/:iccid/call/hangup", post(hangup))
        .route("/modems/:iccid/ws", get(signaling_ws));

    let mut router = Router::new()
        .merge(health_routes)
        .merge(modem_routes)
        .with_state(state);

    if let Some(handle) = prometheus_handle {
        let metrics_routes = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(handle);
        router = router.merge(metrics_routes);
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
