//! Search lifecycle endpoints: start, cancel, delete-session.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use braid_domain::error::Error;
use braid_engine::EventBus;
use serde::Deserialize;
use serde_json::json;

use crate::config::SearchSettings;
use crate::runtime::worker::{spawn_search, SearchJob};
use crate::state::{AppState, MAX_CONCURRENT_SEARCHES};

#[derive(Debug, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    #[serde(default)]
    pub settings: Option<SearchSettings>,
    /// Reuse an existing session for a follow-up turn.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..12].to_string()
}

pub async fn start_search(
    State(state): State<AppState>,
    Json(body): Json<SearchRequestBody>,
) -> Response {
    // ── Session resolution ────────────────────────────────────────
    let (session_id, follow_up) = match &body.session_id {
        Some(id) => {
            if state.sessions.get(id).is_none() {
                return error_response(StatusCode::NOT_FOUND, "Session not found");
            }
            if state.sessions.is_busy(id) {
                return error_response(StatusCode::CONFLICT, "Session has an active search");
            }
            (id.clone(), true)
        }
        None => (short_id(), false),
    };

    // ── Capacity check ────────────────────────────────────────────
    if state.searches.active_count() >= MAX_CONCURRENT_SEARCHES {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service busy, retry later");
    }

    let search_id = short_id();
    let bus = Arc::new(EventBus::new());
    state.searches.insert(&search_id, bus);

    let settings = state
        .config
        .resolve(&body.settings.clone().unwrap_or_default());

    tracing::info!(
        search_id = %search_id,
        session_id = %session_id,
        follow_up,
        model = %settings.model,
        "search accepted"
    );

    spawn_search(
        state.clone(),
        SearchJob {
            search_id: search_id.clone(),
            query: body.query,
            settings,
            session_id: session_id.clone(),
            follow_up,
        },
    );

    Json(json!({ "search_id": search_id, "session_id": session_id })).into_response()
}

pub async fn cancel_search(
    State(state): State<AppState>,
    Path(search_id): Path<String>,
) -> Response {
    match state.searches.get(&search_id) {
        Some(bus) => {
            bus.cancel();
            Json(json!({ "status": "cancelled" })).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "Search not found"),
    }
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.delete(&session_id) {
        Ok(()) => Json(json!({ "status": "deleted" })).into_response(),
        Err(Error::SessionNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Session not found")
        }
        Err(Error::SessionBusy { .. }) => {
            error_response(StatusCode::CONFLICT, "Session has an active search")
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

pub(crate) fn error_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}
