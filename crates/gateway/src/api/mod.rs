//! HTTP surface.
//!
//! - `POST   /api/search`                — start (or follow up on) a search
//! - `POST   /api/search/{id}/cancel`    — cancel a running search
//! - `GET    /api/search/{id}/stream`    — SSE event stream (with replay)
//! - `DELETE /api/session/{id}`          — tear down a persistent session
//! - `GET    /api/health`                — probe the retrieval backend
//! - `GET    /api/logs/recent`           — list recent audit logs
//! - `GET    /api/logs/{id}`             — load one audit log
//! - `DELETE /api/logs/{id}`             — delete one audit log

pub mod auth;
pub mod health;
pub mod logs;
pub mod search;
pub mod stream;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/search", post(search::start_search))
        .route("/api/search/:search_id/cancel", post(search::cancel_search))
        .route("/api/search/:search_id/stream", get(stream::stream_search))
        .route("/api/session/:session_id", delete(search::delete_session))
        .route("/api/health", get(health::health))
        .route("/api/logs/recent", get(logs::list_recent))
        .route(
            "/api/logs/:search_id",
            get(logs::get_log).delete(logs::delete_log),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
