use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{self, AppState};

/// Create the HTTP signaling router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/offer", post(handlers::offer))
        .route("/stunServers", get(handlers::stun_servers))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/:id/close", post(handlers::close_session))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
