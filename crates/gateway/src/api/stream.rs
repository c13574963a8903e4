//! SSE streaming endpoint.
//!
//! `GET /api/search/{id}/stream?replay={0|1}`
//!
//! With `replay=1` the full bus log is sent before switching to live
//! polling, so reconnecting clients see every event in original order.
//! The poll loop drains the bus every 100 ms, the keep-alive comment goes
//! out every 15 s, and the stream hard-expires after 10 minutes. A client
//! that disconnects mid-search cancels the bus.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use braid_engine::EventBus;
use serde::Deserialize;

use crate::api::search::error_response;
use crate::state::{AppState, SearchRegistry};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
const STREAM_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub replay: u8,
}

/// Cancels the search when the client goes away before a terminal event.
struct DisconnectGuard {
    bus: Arc<EventBus>,
    registry: Arc<SearchRegistry>,
    search_id: String,
    finished: bool,
}

impl DisconnectGuard {
    fn finish(&mut self) {
        self.finished = true;
        self.registry.remove(&self.search_id);
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(search_id = %self.search_id, "SSE client disconnected, cancelling");
            self.bus.cancel();
            self.registry.remove(&self.search_id);
        }
    }
}

pub async fn stream_search(
    State(state): State<AppState>,
    Path(search_id): Path<String>,
    Query(params): Query<StreamQuery>,
) -> Response {
    let Some(bus) = state.searches.get(&search_id) else {
        return error_response(axum::http::StatusCode::NOT_FOUND, "Search not found");
    };

    let mut guard = DisconnectGuard {
        bus: bus.clone(),
        registry: state.searches.clone(),
        search_id: search_id.clone(),
        finished: false,
    };
    let replay = params.replay != 0;

    let stream = async_stream::stream! {
        let deadline = Instant::now() + STREAM_TIMEOUT;

        if replay {
            for event in guard.bus.replay() {
                let terminal = event.kind.is_terminal();
                yield frame(&event);
                if terminal {
                    guard.finish();
                    return;
                }
            }
            // Pending events were covered by the replay; drop them so the
            // live loop does not repeat anything.
            guard.bus.drain();
        }

        loop {
            if Instant::now() >= deadline {
                guard.finish();
                yield Ok(SseEvent::default()
                    .data(r#"{"type":"error","data":{"message":"Search timed out"}}"#));
                return;
            }

            for event in guard.bus.drain() {
                let terminal = event.kind.is_terminal();
                yield frame(&event);
                if terminal {
                    // One post-terminal drain keeps nothing behind.
                    guard.bus.drain();
                    guard.finish();
                    return;
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(KEEPALIVE_INTERVAL)
                .text("keepalive"),
        )
        .into_response()
}

fn frame(event: &braid_domain::Event) -> Result<SseEvent, std::convert::Infallible> {
    Ok(SseEvent::default()
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".into())))
}
