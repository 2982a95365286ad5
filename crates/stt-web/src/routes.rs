//! Router construction: `/health` plus the two WebSocket endpoints.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};

use crate::bootstrap::{AppContext, CorsConfig};
use crate::state::AppState;
use crate::{compare_ws, voice_ws};

fn build_cors_layer(config: &CorsConfig) -> CorsLayer {
    match config {
        CorsConfig::AllowAll => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        CorsConfig::AllowOrigins(origins) => {
            use axum::http::HeaderValue;
            let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    }
}

/// Build the full router: a health check plus the compare and voice
/// WebSocket upgrade endpoints.
pub fn create_router(ctx: Arc<AppContext>, cors_config: &CorsConfig) -> Router {
    let state: AppState = ctx;
    let cors = build_cors_layer(cors_config);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/compare", get(compare_ws::upgrade))
        .route("/ws/voice", get(voice_ws::upgrade))
        .with_state(state)
        .layer(cors)
}

async fn health_check() -> &'static str {
    "OK"
}
