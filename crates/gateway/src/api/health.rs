//! Health probe against the downstream retrieval API.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::state::AppState;

/// Any response at all from `{url}/health` counts as reachable; only
/// connection-level failures degrade.
pub async fn probe_cascade(url: &str) -> bool {
    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
    {
        Ok(c) => c,
        Err(_) => return false,
    };
    client.get(format!("{url}/health")).send().await.is_ok()
}

pub async fn health(State(state): State<AppState>) -> Response {
    // Prefer the URL that answered at startup; fall back to config.
    let cached = state.cascade_url.read().clone();
    let url = cached.unwrap_or_else(|| state.config.cascade_api_url.clone());

    if probe_cascade(&url).await {
        *state.cascade_url.write() = Some(url.clone());
        Json(json!({
            "status": "ok",
            "cascade_api": "connected",
            "cascade_url": url,
        }))
        .into_response()
    } else {
        Json(json!({
            "status": "degraded",
            "cascade_api": "unreachable",
            "cascade_url": url,
        }))
        .into_response()
    }
}
