//! HTTP API: axum router over the status reporter and the transfer gateway.
//!
//! Read routes sit behind a request timeout. Withdraw routes are bounded by
//! the pipeline's own confirmation timeout instead.

pub mod routes;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use routes::{ApiState, AppState};

/// Every path the withdraw handler answers on.
pub const WITHDRAW_PATHS: [&str; 4] = ["/withdraw", "/send-eth", "/transfer", "/coinbase-withdraw"];

/// Build the router with all routes and middleware.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let reads = Router::new()
        .route("/status", get(routes::get_status))
        .route("/health", get(routes::health))
        .route("/earnings", get(routes::get_earnings))
        .route("/strategies/live", get(routes::get_live_strategies))
        .route("/api/apex/strategies/live", get(routes::get_live_strategies))
        .route("/balance", get(routes::get_balance))
        .layer(TimeoutLayer::new(request_timeout));

    let writes = WITHDRAW_PATHS
        .into_iter()
        .fold(Router::new(), |router, path| router.route(path, post(routes::withdraw)));

    reads
        .merge(writes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
