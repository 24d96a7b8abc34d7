//! The MTConnect agent service: wires the `mtc-*` library crates into an
//! axum app. Unlike the teacher's `services/server`, almost every route
//! shares one handler (teacher analog: `services/server/src/lib.rs`
//! `build_router`) — dispatch itself lives in [`http::dispatch`], routed
//! through [`mtc_router::RoutingTable`] rather than axum's own tree, so
//! registration-order-wins semantics (spec.md §4.3) hold across the whole
//! surface instead of just within one router.

pub mod assets;
pub mod auth;
pub mod config;
pub mod device_filter;
pub mod error_response;
pub mod http;
pub mod loopback;
pub mod routes;
pub mod serialize;
pub mod state;
pub mod streaming;

pub use config::AgentConfig;
pub use state::AppState;

use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Build the axum [`Router`]. `/healthz`/`/readyz` are liveness probes, kept
/// outside the MTConnect routing table the same way the teacher keeps them
/// outside its own `/api/v1/...` tree; everything else falls through to
/// [`http::dispatch`]. Every request gets a `tracing` span via
/// [`TraceLayer`], the ambient request logging this service otherwise has
/// no other place to hang (teacher analog: `services/server`'s per-request
/// `tracing::info!` calls, generalized here to a layer since there is no
/// single per-route handler to thread that logging through).
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .fallback(http::dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn readyz() -> impl IntoResponse {
    "ok"
}
