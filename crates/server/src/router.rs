//! Router assembly: routes, body limit, auth + rate-limit layers, CORS.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::state::AppState;
use crate::{api, auth, rate_limit};

/// Ingest payloads are capped at 256 KiB.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    let ingest = Router::new()
        .route("/v1/ingest/syslog", post(api::ingest::ingest_syslog))
        .route(
            "/v1/ingest/syslog/bulk",
            post(api::ingest::ingest_syslog_bulk),
        )
        // Layers run bottom-up: authenticate first, then rate limit.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::enforce_rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    Router::new()
        .route("/health", get(api::health::health))
        .merge(ingest)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(&state.config.server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &str) -> CorsLayer {
    if origins.trim() == "*" {
        return CorsLayer::permissive();
    }
    let list: Vec<HeaderValue> = origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();
    CorsLayer::new().allow_origin(AllowOrigin::list(list))
}
