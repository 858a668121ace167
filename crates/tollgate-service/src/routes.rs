//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, relay, wallet};
use crate::state::AppState;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Relay (bearer token auth)
/// - `POST /api/*path` - Metered relay; only configured billable path
///   suffixes (default `/chat/completions`) are forwarded
///
/// ## Wallet (bearer token auth)
/// - `GET /v1/wallet` - Get the caller's wallet
/// - `GET /v1/wallet/transactions` - List transaction history
///
/// ## Admin (service API key auth)
/// - `POST /v1/wallet` - Provision a wallet
/// - `POST /v1/wallet/credit` - Grant credits
/// - `POST /v1/price-table/invalidate` - Drop the cached price table
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let state = Arc::new(state);

    // The relay stays outside the timeout layer: streamed completions can
    // legitimately run longer than any fixed request deadline.
    let wallet_api = Router::new()
        .route("/health", get(health::health))
        .route("/v1/wallet", post(wallet::create_wallet))
        .route("/v1/wallet", get(wallet::get_wallet))
        .route("/v1/wallet/transactions", get(wallet::list_transactions))
        .route("/v1/wallet/credit", post(wallet::add_credits))
        .route(
            "/v1/price-table/invalidate",
            post(wallet::invalidate_price_table),
        )
        .layer(TimeoutLayer::new(timeout));

    Router::new()
        .route("/api/*path", post(relay::relay))
        .merge(wallet_api)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
