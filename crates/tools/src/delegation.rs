//! Nested delegation: `rlm_query` spawns a child driver with its own
//! sandbox and a reduced iteration budget.
//!
//! The child shares the parent's bus handle, so its iterations surface as
//! `sub_iteration` events in-band and parent cancellation reaches it at
//! its next iteration boundary. On success the child's evidence merges
//! into the parent store (higher score wins, parent ratings kept).

use std::sync::Arc;

use braid_domain::error::{Error, Result};
use braid_engine::logger::ChildLogger;
use braid_engine::sandbox::SandboxBuilder;
use braid_engine::Driver;
use serde_json::{json, Value};

use crate::context::{DelegationConfig, SearchContext};
use crate::install::{install_tools, setup_code, SUB_AGENT_SYSTEM_PROMPT};
use crate::tracker::track;

/// Delegate a sub-question to an isolated child agent.
///
/// Depth-guarded: at or beyond `max_delegation_depth` this returns an
/// error object without spawning (and at `max_delegation_depth == 0` the
/// tool is never registered in the first place). Child failures come back
/// as `{error}` — only cancellation unwinds the parent.
pub fn rlm_query(
    ctx: &Arc<SearchContext>,
    sub_question: &str,
    instructions: &str,
) -> Result<Value> {
    track(
        ctx,
        "rlm_query",
        json!({ "sub_question": sub_question, "instructions": instructions }),
        |tc| {
            let cfg = &ctx.delegation;
            if cfg.depth >= cfg.max_delegation_depth {
                ctx.print(&format!(
                    "[rlm_query] ERROR: depth={}, cannot delegate",
                    cfg.depth
                ));
                tc.set_summary(json!({ "sub_question": sub_question, "error": "depth_guard" }));
                return Ok(json!({ "error": "delegation depth limit reached" }));
            }

            ctx.print(&format!("[rlm_query] Delegating: \"{sub_question}\""));

            let child_depth = cfg.depth + 1;
            // Children run on a reduced budget; grandchildren tighter still.
            let budget = if child_depth <= 1 {
                cfg.sub_iterations.max(2)
            } else {
                cfg.sub_iterations.saturating_sub(1).max(2)
            };

            let outcome = run_child(ctx, sub_question, instructions, child_depth, budget);

            match outcome {
                Ok((answer, child_evidence)) => {
                    let searches_run = child_evidence.query_count();
                    // Count only ids the parent did not already hold.
                    let merged: usize = child_evidence
                        .snapshot()
                        .keys()
                        .filter(|id| ctx.evidence.get(id).is_none())
                        .count();
                    ctx.evidence.merge(&child_evidence);

                    ctx.print(&format!(
                        "[rlm_query] Complete: {searches_run} searches, {merged} sources merged"
                    ));
                    tc.set_summary(json!({
                        "sub_question": sub_question,
                        "searches_run": searches_run,
                        "answer_length": answer.len(),
                        "sources_merged": merged,
                    }));
                    Ok(json!({
                        "answer": answer,
                        "sub_question": sub_question,
                        "searches_run": searches_run,
                        "sources_merged": merged,
                    }))
                }
                Err(Error::Cancelled) => Err(Error::Cancelled),
                Err(e) => {
                    ctx.print(&format!("[rlm_query] child failed: {e}"));
                    tc.set_summary(json!({ "sub_question": sub_question, "error": e.to_string() }));
                    Ok(json!({ "error": e.to_string() }))
                }
            }
        },
    )
}

/// Build the child context + sandbox + driver and run it to completion.
fn run_child(
    ctx: &Arc<SearchContext>,
    sub_question: &str,
    instructions: &str,
    child_depth: usize,
    budget: usize,
) -> Result<(String, Arc<braid_engine::EvidenceStore>)> {
    let mut builder = SandboxBuilder::new();

    let mut child_ctx = SearchContext::new(
        ctx.api.clone(),
        ctx.bus.clone(),
        ctx.lm.clone(),
        builder.output(),
        builder.call_sink(),
    );
    child_ctx.kb_overview = ctx.kb_overview.clone();
    child_ctx.multi_mode = ctx.multi_mode;
    child_ctx.delegation = DelegationConfig {
        depth: child_depth,
        max_delegation_depth: ctx.delegation.max_delegation_depth,
        sub_iterations: ctx.delegation.sub_iterations,
    };
    let child_ctx = Arc::new(child_ctx);

    install_tools(&mut builder, &child_ctx);
    let sandbox = builder.build(&setup_code())?;

    let mut driver = Driver::new(
        sandbox,
        ctx.lm.clone(),
        ctx.bus.clone(),
        budget,
        SUB_AGENT_SYSTEM_PROMPT.to_string(),
    );

    let logger = ChildLogger::new(sub_question, ctx.bus.clone(), ctx.audit());

    let prompt = if instructions.is_empty() {
        sub_question.to_string()
    } else {
        format!("{sub_question}\n\nInstructions: {instructions}")
    };

    let completion = driver.run(&prompt, None, &logger)?;
    Ok((
        completion.response.unwrap_or_default(),
        child_ctx.evidence.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{raw_context, FakeCascade, FakeLm};
    use braid_domain::{EventKind, Hit};

    fn delegating_context(
        api: Arc<FakeCascade>,
        lm: Arc<FakeLm>,
        depth: usize,
        max_depth: usize,
    ) -> Arc<SearchContext> {
        let mut inner = raw_context(api, lm);
        inner.delegation = DelegationConfig {
            depth,
            max_delegation_depth: max_depth,
            sub_iterations: 3,
        };
        Arc::new(inner)
    }

    #[test]
    fn depth_guard_returns_error_without_spawning() {
        let lm = Arc::new(FakeLm::default());
        let ctx = delegating_context(Arc::new(FakeCascade::default()), lm.clone(), 1, 1);

        let out = rlm_query(&ctx, "sub question", "").unwrap();
        assert_eq!(out["error"], "delegation depth limit reached");
        // No child LM traffic at all.
        assert!(lm.prompts.lock().is_empty());
        let calls = ctx.tool_calls();
        assert_eq!(calls[0].result_summary["error"], "depth_guard");
    }

    #[test]
    fn child_runs_merges_sources_and_streams_sub_iterations() {
        let api = Arc::new(FakeCascade::default());
        // The child's search inside research().
        api.queue_hits(&[("100", 0.9), ("200", 0.4)]);

        let lm = Arc::new(FakeLm::default());
        // Child iteration 1: run research; iteration 2: final.
        lm.push_response(
            "```repl\nresearch(\"child sub query\");\n```",
        );
        // research's evaluation batch call.
        lm.push_response("[100] RELEVANT CONFIDENCE:5\n[200] RELEVANT CONFIDENCE:4");
        lm.push_response("FINAL(child answer)");

        let ctx = delegating_context(api, lm, 0, 1);
        // Parent already holds id 200 with a higher score.
        ctx.evidence.register_hit(Hit {
            id: "200".into(),
            score: 0.95,
            question: "parent q".into(),
            answer: "parent a".into(),
            metadata: Default::default(),
        });

        let out = rlm_query(&ctx, "Sub-Q", "").unwrap();
        assert_eq!(out["answer"], "child answer");
        assert_eq!(out["sub_question"], "Sub-Q");
        assert_eq!(out["searches_run"], 1);
        // Only id 100 was new to the parent.
        assert_eq!(out["sources_merged"], 1);
        // Higher parent score kept for the overlap.
        assert_eq!(ctx.evidence.get("200").unwrap().score, 0.95);
        assert!(ctx.evidence.get("100").is_some());

        // Child iterations visible on the parent bus.
        let events = ctx.bus.bus().replay();
        let subs = events
            .iter()
            .filter(|e| e.kind == EventKind::SubIteration)
            .count();
        assert_eq!(subs, 2);
    }

    #[test]
    fn child_failure_comes_back_as_error_object() {
        struct DeadLm;
        impl braid_domain::LmHandler for DeadLm {
            fn completion(
                &self,
                _messages: &[braid_domain::ChatMessage],
            ) -> Result<String> {
                Err(Error::Provider {
                    provider: "test".into(),
                    message: "unreachable".into(),
                })
            }
            fn completion_batched(&self, prompts: &[String]) -> Vec<String> {
                vec![String::new(); prompts.len()]
            }
        }

        let mut inner = raw_context(Arc::new(FakeCascade::default()), Arc::new(FakeLm::default()));
        inner.delegation = DelegationConfig {
            depth: 0,
            max_delegation_depth: 1,
            sub_iterations: 3,
        };
        inner.lm = Arc::new(DeadLm);
        let ctx = Arc::new(inner);

        let out = rlm_query(&ctx, "sub", "").unwrap();
        assert!(out["error"].as_str().unwrap().contains("unreachable"));
        // The tool call itself did not error (failure is data, not a fault).
        assert!(ctx.tool_calls()[0].error.is_none());
    }

    #[test]
    fn parent_cancellation_reaches_the_child() {
        let lm = Arc::new(FakeLm::default());
        let ctx = delegating_context(Arc::new(FakeCascade::default()), lm, 0, 1);
        ctx.bus.bus().cancel();
        let err = rlm_query(&ctx, "sub", "").unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn grandchild_budget_is_tighter() {
        // depth 0 -> child budget max(2, 3) = 3; depth 1 -> max(2, 2) = 2.
        // Exercised indirectly: a child at depth 1 with max_depth 2 spawns
        // a grandchild whose loop budget is sub_iterations - 1.
        let lm = Arc::new(FakeLm::default());
        // Grandchild never finds a sentinel: 2 iterations + fallback.
        lm.push_response("no code here");
        lm.push_response("still no code");
        lm.push_response("fallback answer");
        let ctx = delegating_context(Arc::new(FakeCascade::default()), lm.clone(), 1, 2);

        let out = rlm_query(&ctx, "grandchild task", "").unwrap();
        assert_eq!(out["answer"], "fallback answer");
        // Exactly 3 LM calls: two iterations and the fallback.
        assert_eq!(lm.prompts.lock().len(), 3);
    }
}
