//! Audit-log endpoints over the per-search JSONL files.

use std::path::PathBuf;
use std::sync::OnceLock;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::search::error_response;
use crate::state::AppState;

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-f0-9-]{1,36}$").unwrap())
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/logs/recent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_recent(
    State(state): State<AppState>,
    Query(params): Query<RecentQuery>,
) -> Response {
    let mut files = match log_files(&state, None) {
        Ok(files) => files,
        Err(_) => return Json(json!([])).into_response(),
    };
    // Newest first.
    files.sort_by_key(|(_, mtime)| std::cmp::Reverse(*mtime));

    let mut results = Vec::new();
    for (path, _) in files.into_iter().take(params.limit) {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Some(first_line) = content.lines().next() else {
            continue;
        };
        let Ok(meta) = serde_json::from_str::<Value>(first_line) else {
            continue;
        };
        results.push(json!({
            "filename": path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
            "search_id": meta["search_id"].as_str().unwrap_or(""),
            "query": meta["query"].as_str().unwrap_or(""),
            "timestamp": meta["timestamp"].as_str().unwrap_or(""),
            "root_model": meta["root_model"].as_str().unwrap_or(""),
        }));
    }
    Json(json!(results)).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/logs/{search_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_log(
    State(state): State<AppState>,
    Path(search_id): Path<String>,
) -> Response {
    if !id_re().is_match(&search_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid search_id format");
    }
    let matches = match log_files(&state, Some(&search_id)) {
        Ok(m) if !m.is_empty() => m,
        _ => return error_response(StatusCode::NOT_FOUND, "Log not found"),
    };
    // Prefix-ambiguous ids resolve to the most recent file.
    let Some(path) = matches
        .into_iter()
        .max_by_key(|(_, mtime)| *mtime)
        .map(|(p, _)| p)
    else {
        return error_response(StatusCode::NOT_FOUND, "Log not found");
    };

    let Ok(content) = std::fs::read_to_string(&path) else {
        return error_response(StatusCode::NOT_FOUND, "Log not found");
    };
    let events: Vec<Value> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    if events.is_empty() {
        return error_response(StatusCode::NOT_FOUND, "Empty log file");
    }

    let metadata = events.iter().find(|e| e["type"] == "metadata").cloned();
    let mut iterations: Vec<Value> =
        events.iter().filter(|e| e["type"] == "iteration").cloned().collect();
    let done = events.iter().find(|e| e["type"] == "done").cloned();
    let error = events.iter().find(|e| e["type"] == "error").cloned();
    backfill_tool_calls(&mut iterations);

    Json(json!({
        "metadata": metadata,
        "iterations": iterations,
        "done": done,
        "error": error,
        "filename": path.file_name().and_then(|n| n.to_str()).unwrap_or(""),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /api/logs/{search_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn delete_log(
    State(state): State<AppState>,
    Path(search_id): Path<String>,
) -> Response {
    if !id_re().is_match(&search_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid search_id format");
    }
    let matches = match log_files(&state, Some(&search_id)) {
        Ok(m) if !m.is_empty() => m,
        _ => return error_response(StatusCode::NOT_FOUND, "Log not found"),
    };
    for (path, _) in matches {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "log delete failed");
        }
    }
    Json(json!({ "deleted": search_id })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Mtime = std::time::SystemTime;

/// `search_*.jsonl` files in the log dir, optionally filtered to a
/// search-id prefix.
fn log_files(state: &AppState, id_prefix: Option<&str>) -> std::io::Result<Vec<(PathBuf, Mtime)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(&state.config.log_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let matched = match id_prefix {
            Some(prefix) => {
                name.starts_with(&format!("search_{prefix}")) && name.ends_with(".jsonl")
            }
            None => name.starts_with("search_") && name.ends_with(".jsonl"),
        };
        if matched {
            let mtime = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            files.push((entry.path(), mtime));
        }
    }
    Ok(files)
}

/// Older iterations recorded the cumulative tool-call list only inside
/// code-block locals; lift it to the top level so every iteration has a
/// `tool_calls` field.
fn backfill_tool_calls(iterations: &mut [Value]) {
    let mut prior_total = 0usize;
    for iteration in iterations {
        if let Some(existing) = iteration["tool_calls"].as_array() {
            prior_total += existing.len();
            continue;
        }
        let mut cumulative: Option<Vec<Value>> = None;
        if let Some(blocks) = iteration["code_blocks"].as_array() {
            for block in blocks {
                if let Some(tc) = block["result"]["locals"]["tool_calls"].as_array() {
                    cumulative = Some(tc.clone());
                }
            }
        }
        match cumulative {
            Some(all) => {
                let fresh: Vec<Value> = all.iter().skip(prior_total).cloned().collect();
                prior_total = all.len();
                iteration["tool_calls"] = json!(fresh);
            }
            None => {
                iteration["tool_calls"] = json!([]);
            }
        }
    }
}
