use std::time::Duration;

use braid_gateway::api;
use braid_gateway::api::health::probe_cascade;
use braid_gateway::config::Config;
use braid_gateway::state::AppState;
use tracing_subscriber::EnvFilter;

/// Interval of the background sweep that drops finished buses and reaps
/// idle sessions.
const REAPER_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,braid_gateway=debug")),
        )
        .init();

    let config = Config::from_env();
    let port = config.port;
    tracing::info!(
        cascade = %config.cascade_api_url,
        backend = %config.backend,
        model = %config.model,
        max_iterations = config.max_iterations,
        "braid starting"
    );

    let state = AppState::new(config);

    // ── Startup probe: cascade reachability + taxonomy overview ──────
    if probe_cascade(&state.config.cascade_api_url).await {
        *state.cascade_url.write() = Some(state.config.cascade_api_url.clone());
        tracing::info!(url = %state.config.cascade_api_url, "cascade API reachable");
        match fetch_overview(&state).await {
            Some(overview) => {
                tracing::info!(
                    categories = overview.categories.len(),
                    total_docs = overview.total_documents,
                    "knowledge-base overview cached"
                );
                *state.kb_overview.write() = Some(overview);
            }
            None => tracing::warn!("no knowledge-base overview available"),
        }
    } else {
        tracing::warn!(url = %state.config.cascade_api_url, "cascade API unreachable");
    }

    // ── Background reaper ────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(REAPER_INTERVAL).await;
                let swept = state.searches.sweep_finished();
                let reaped = state.sessions.cleanup_expired();
                if swept > 0 || !reaped.is_empty() {
                    tracing::debug!(swept, reaped = reaped.len(), "reaper pass");
                }
            }
        });
    }

    // ── Serve ────────────────────────────────────────────────────────
    let app = api::router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// One facet-browse call at startup; the overview builder itself lives in
/// the retrieval service.
async fn fetch_overview(state: &AppState) -> Option<braid_tools::KbOverview> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .ok()?;
    let mut req = client
        .post(format!("{}/browse", state.config.cascade_api_url))
        .json(&serde_json::json!({
            "collection": "primary",
            "offset": 0,
            "limit": 0,
            "include_facets": true,
        }));
    if !state.config.cascade_api_key.is_empty() {
        req = req.header("x-api-key", &state.config.cascade_api_key);
    }
    let body: serde_json::Value = req.send().await.ok()?.json().await.ok()?;
    braid_tools::kb::overview_from_browse(&body)
}
