//! The search worker.
//!
//! One search occupies one worker from the bounded pool for its whole
//! duration. The worker assembles (or reclaims) the session, runs the
//! iteration driver to completion on a blocking thread, and guarantees a
//! terminal event on the bus on every exit path — done, error, or
//! cancelled — before clearing the session's active-search marker.

use std::sync::{Arc, OnceLock};

use braid_domain::error::Error;
use braid_domain::{LmHandler, RunMetadata};
use braid_engine::logger::StreamingLogger;
use braid_engine::sandbox::SandboxBuilder;
use braid_engine::{BusHandle, Driver, DriverLogger};
use braid_providers::{create_provider, Backend, BlockingLm, ProviderSettings};
use braid_tools::{
    install_tools, setup_code, system_prompt, CascadeClient, DelegationConfig, SearchContext,
};
use regex::Regex;
use serde_json::{json, Value};
use tokio::runtime::Handle;

use crate::config::ResolvedSettings;
use crate::runtime::sessions::SessionHandle;
use crate::state::AppState;

/// One accepted search, ready to run.
pub struct SearchJob {
    pub search_id: String,
    pub query: String,
    pub settings: ResolvedSettings,
    pub session_id: String,
    /// True when the session already exists and this is a follow-up.
    pub follow_up: bool,
}

/// Schedule a job on the worker pool. Returns immediately; the job queues
/// when all workers are busy.
pub fn spawn_search(state: AppState, job: SearchJob) {
    let handle = Handle::current();
    tokio::spawn(async move {
        let permit = state.pool.clone().acquire_owned().await;
        let search_id = job.search_id.clone();
        let blocking_state = state.clone();
        let outcome =
            tokio::task::spawn_blocking(move || run_search(blocking_state, handle, job)).await;
        drop(permit);
        if let Err(e) = outcome {
            tracing::error!(search_id = %search_id, error = %e, "search worker panicked");
            if let Some(bus) = state.searches.get(&search_id) {
                bus.emit(
                    braid_domain::EventKind::Error,
                    json!({ "message": "internal worker failure" }),
                );
            }
        }
    });
}

/// Drive one search to a terminal event. Runs on a blocking thread.
fn run_search(state: AppState, handle: Handle, job: SearchJob) {
    let Some(bus) = state.searches.get(&job.search_id) else {
        tracing::warn!(search_id = %job.search_id, "search bus vanished before start");
        return;
    };

    let prepared = if job.follow_up {
        prepare_follow_up(&state, &job, bus.clone())
    } else {
        prepare_new_session(&state, &handle, &job, bus.clone())
    };

    let (session, logger) = match prepared {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(search_id = %job.search_id, error = %e, "search setup failed");
            bus.emit(
                braid_domain::EventKind::Error,
                json!({ "message": e.to_string() }),
            );
            // A busy rejection means another search owns the session's
            // active marker; leave it alone.
            if !matches!(e, Error::SessionBusy { .. }) {
                state.sessions.clear_active(&job.session_id);
            }
            return;
        }
    };

    logger.log_metadata(&session.metadata);

    let outcome = {
        let mut driver = session.driver.lock();
        driver.run(&job.query, None, &logger)
    };

    match outcome {
        Ok(completion) => {
            let answer = completion.response.unwrap_or_default();
            let sources = collect_sources(&session, &answer);
            logger.mark_done(Some(&answer), sources, completion.execution_time);
            tracing::info!(
                search_id = %job.search_id,
                iterations = completion.iterations,
                "search complete"
            );
        }
        Err(Error::Cancelled) => {
            logger.mark_cancelled();
            tracing::info!(search_id = %job.search_id, "search cancelled");
        }
        Err(e) => {
            tracing::error!(search_id = %job.search_id, error = %e, "search failed");
            logger.mark_error(&e.to_string());
        }
    }

    state.sessions.clear_active(&job.session_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type Prepared = braid_domain::error::Result<(Arc<SessionHandle>, StreamingLogger)>;

fn prepare_follow_up(state: &AppState, job: &SearchJob, bus: Arc<braid_engine::EventBus>) -> Prepared {
    let session = state
        .sessions
        .prepare_follow_up(&job.session_id, bus, &job.search_id)?;
    let logger = StreamingLogger::new(
        &state.config.log_dir,
        &job.search_id,
        &job.query,
        session.bus.clone(),
    )?;
    session.ctx.rebind_audit(Some(logger.jsonl()));
    Ok((session, logger))
}

fn prepare_new_session(
    state: &AppState,
    handle: &Handle,
    job: &SearchJob,
    bus: Arc<braid_engine::EventBus>,
) -> Prepared {
    let settings = &job.settings;
    let bus_handle = BusHandle::new(bus);
    let logger = StreamingLogger::new(
        &state.config.log_dir,
        &job.search_id,
        &job.query,
        bus_handle.clone(),
    )?;

    // ── LM providers ──────────────────────────────────────────────
    let backend = Backend::parse(&settings.backend)?;
    let api_key = match backend {
        Backend::Anthropic => state.config.anthropic_api_key.clone(),
        Backend::OpenAi => state.config.openai_api_key.clone(),
        Backend::ClaudeCli => String::new(),
    };
    let make_lm = |model: &str| -> braid_domain::error::Result<Arc<dyn LmHandler>> {
        let provider = create_provider(&ProviderSettings {
            backend,
            model: model.to_string(),
            api_key: api_key.clone(),
            base_url: None,
        })?;
        Ok(Arc::new(BlockingLm::new(provider, handle.clone())))
    };
    let root_lm = make_lm(&settings.model)?;
    let sub_lm = make_lm(&settings.sub_model)?;
    let classify_lm = if settings.classify_model.is_empty() {
        None
    } else {
        Some(make_lm(&settings.classify_model)?)
    };

    // ── Sandbox + tool context ────────────────────────────────────
    let cascade = Arc::new(CascadeClient::new(
        &state.config.cascade_api_url,
        &state.config.cascade_api_key,
        handle.clone(),
    )?);

    let mut builder = SandboxBuilder::new();
    let mut ctx = SearchContext::new(
        cascade,
        bus_handle.clone(),
        sub_lm,
        builder.output(),
        builder.call_sink(),
    );
    ctx.classify_lm = classify_lm;
    ctx.kb_overview = state.kb_overview.read().clone();
    ctx.delegation = DelegationConfig {
        depth: 0,
        max_delegation_depth: settings.max_delegation_depth,
        sub_iterations: settings.sub_iterations,
    };
    let ctx = Arc::new(ctx);
    ctx.rebind_audit(Some(logger.jsonl()));

    install_tools(&mut builder, &ctx);
    braid_tools::subagent::init_classify(&ctx, &job.query);
    let sandbox = builder.build(&setup_code())?;

    // max_depth 0 disables code execution: a zero-iteration budget sends
    // the driver straight to the anchored fallback completion.
    let budget = if settings.max_depth == 0 {
        0
    } else {
        settings.max_iterations
    };
    let driver = Driver::new(
        sandbox,
        root_lm,
        bus_handle.clone(),
        budget,
        system_prompt(settings.max_iterations),
    );

    let metadata = RunMetadata {
        root_model: settings.model.clone(),
        backend: settings.backend.clone(),
        max_iterations: settings.max_iterations,
        max_depth: settings.max_depth,
        environment: "rhai".into(),
    };

    let session = Arc::new(SessionHandle::new(
        &job.session_id,
        driver,
        ctx,
        bus_handle,
        metadata,
        &job.search_id,
    ));
    state.sessions.insert(session.clone());
    Ok((session, logger))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Source extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Sources for the `done` payload: the rated registry when available,
/// otherwise whatever the answer cites.
fn collect_sources(session: &SessionHandle, answer: &str) -> Value {
    let top = session.ctx.evidence.top_rated(20);
    if !top.is_empty() {
        return serde_json::to_value(top).unwrap_or_else(|_| json!([]));
    }
    extract_cited_sources(answer, session)
}

fn source_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Source:\s*([\w-]+)\]").unwrap())
}

fn extract_cited_sources(answer: &str, session: &SessionHandle) -> Value {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for caps in source_re().captures_iter(answer) {
        let id = caps[1].to_string();
        if !seen.insert(id.clone()) {
            continue;
        }
        match session.ctx.evidence.get(&id) {
            Some(hit) => sources.push(serde_json::to_value(hit).unwrap_or(json!({ "id": id }))),
            None => sources.push(json!({ "id": id })),
        }
    }
    json!(sources)
}
