//! Registers the tool suite into a sandbox and carries the agent-facing
//! system prompts.
//!
//! Conversions at the boundary: rhai maps/arrays cross into
//! `serde_json::Value` on the way in, tool results cross back with
//! `to_dynamic` on the way out. Tool failures become script runtime
//! errors, which the driver's cascade breaker then handles like any other
//! failing fragment.

use std::sync::Arc;

use braid_domain::Hit;
use braid_engine::sandbox::SandboxBuilder;
use rhai::{Array, Dynamic, EvalAltResult, Map};
use serde_json::{json, Value};

use crate::api_tools::{browse, lookup, search, search_multi, BrowseOptions};
use crate::composite::{draft_answer, research, ResearchSpec};
use crate::context::SearchContext;
use crate::delegation::rlm_query;
use crate::format::format_evidence;
use crate::progress::check_progress;
use crate::subagent::{critique_answer, evaluate_results, reformulate};

type RhaiRes = Result<Dynamic, Box<EvalAltResult>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Boundary conversions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn out(result: braid_domain::error::Result<Value>) -> RhaiRes {
    match result {
        Ok(value) => rhai::serde::to_dynamic(value),
        Err(e) => Err(e.to_string().into()),
    }
}

fn map_to_value(map: Map) -> Value {
    rhai::serde::from_dynamic(&Dynamic::from(map)).unwrap_or(Value::Null)
}

/// Accept either a hit array or a `search()`/`research()` return map with
/// a `results` key.
fn hits_from(dynamic: Dynamic) -> Vec<Hit> {
    let value: Value = rhai::serde::from_dynamic(&dynamic).unwrap_or(Value::Null);
    let hits = if value.get("results").is_some() {
        value["results"].clone()
    } else {
        value
    };
    serde_json::from_value(hits).unwrap_or_default()
}

fn opts_to_spec(query: &str, opts: &Value) -> ResearchSpec {
    ResearchSpec {
        query: if query.is_empty() {
            opts["query"].as_str().unwrap_or_default().to_string()
        } else {
            query.to_string()
        },
        filters: opts.get("filters").filter(|f| !f.is_null()).cloned(),
        top_k: opts["top_k"].as_u64().map(|k| k as usize),
        extra_queries: opts["extra_queries"]
            .as_array()
            .map(|specs| {
                specs
                    .iter()
                    .map(|s| match s {
                        Value::String(q) => ResearchSpec::query(q),
                        other => opts_to_spec("", other),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Register the whole tool suite into the sandbox builder.
///
/// `rlm_query` is exposed only while this context may still delegate;
/// with `max_delegation_depth == 0` the name does not exist in the
/// namespace at all.
pub fn install_tools(builder: &mut SandboxBuilder, ctx: &Arc<SearchContext>) {
    let engine = builder.engine_mut();

    // ── search ────────────────────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn("search", move |query: &str| -> RhaiRes {
        out(search(&c, query, None, 10))
    });
    let c = ctx.clone();
    engine.register_fn("search", move |query: &str, filters: Map| -> RhaiRes {
        out(search(&c, query, Some(map_to_value(filters)), 10))
    });
    let c = ctx.clone();
    engine.register_fn(
        "search",
        move |query: &str, filters: Map, top_k: i64| -> RhaiRes {
            out(search(&c, query, Some(map_to_value(filters)), top_k.max(1) as usize))
        },
    );

    // ── search_multi ──────────────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn("search_multi", move |query: &str| -> RhaiRes {
        out(search_multi(&c, query, None, 10))
    });
    let c = ctx.clone();
    engine.register_fn("search_multi", move |query: &str, top_k: i64| -> RhaiRes {
        out(search_multi(&c, query, None, top_k.max(1) as usize))
    });

    // ── browse ────────────────────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn("browse", move || -> RhaiRes {
        out(browse(&c, BrowseOptions::default()))
    });
    let c = ctx.clone();
    engine.register_fn("browse", move |opts: Map| -> RhaiRes {
        let opts = map_to_value(opts);
        out(browse(
            &c,
            BrowseOptions {
                filters: opts.get("filters").filter(|f| !f.is_null()).cloned(),
                offset: opts["offset"].as_u64().unwrap_or(0) as usize,
                limit: opts["limit"].as_u64().unwrap_or(20) as usize,
                sort_by: opts["sort_by"].as_str().map(String::from),
                group_by: opts["group_by"].as_str().map(String::from),
                group_limit: opts["group_limit"].as_u64().unwrap_or(4) as usize,
            },
        ))
    });

    // ── lookup / kb_overview / classification ─────────────────────
    let c = ctx.clone();
    engine.register_fn("lookup", move |query: &str| -> RhaiRes {
        out(lookup(&c, query))
    });
    let c = ctx.clone();
    engine.register_fn("kb_overview", move || -> RhaiRes {
        match &c.kb_overview {
            Some(overview) => {
                out(Ok(serde_json::to_value(overview).unwrap_or(Value::Null)))
            }
            None => out(Ok(json!({ "message": "no knowledge-base overview available" }))),
        }
    });
    let c = ctx.clone();
    engine.register_fn("classification", move || -> RhaiRes {
        match c.classification() {
            Some(cls) => out(Ok(serde_json::to_value(&cls).unwrap_or(Value::Null))),
            None => Ok(Dynamic::UNIT),
        }
    });

    // ── evaluation & critique ─────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn(
        "evaluate_results",
        move |question: &str, results: Dynamic| -> RhaiRes {
            out(evaluate_results(&c, question, &hits_from(results), 5))
        },
    );
    let c = ctx.clone();
    engine.register_fn(
        "evaluate_results",
        move |question: &str, results: Dynamic, top_n: i64| -> RhaiRes {
            out(evaluate_results(&c, question, &hits_from(results), top_n.max(1) as usize))
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "reformulate",
        move |question: &str, failed_query: &str| -> RhaiRes {
            out(reformulate(&c, question, failed_query, 0.0).map(|qs| json!(qs)))
        },
    );
    let c = ctx.clone();
    engine.register_fn(
        "reformulate",
        move |question: &str, failed_query: &str, top_score: f64| -> RhaiRes {
            out(reformulate(&c, question, failed_query, top_score).map(|qs| json!(qs)))
        },
    );

    let c = ctx.clone();
    engine.register_fn(
        "critique_answer",
        move |question: &str, draft: &str| -> RhaiRes {
            out(critique_answer(&c, question, draft, None)
                .map(|(verdict, passed)| json!({ "verdict": verdict, "passed": passed })))
        },
    );
    let c = ctx.clone();
    engine.register_fn(
        "critique_answer",
        move |question: &str, draft: &str, evidence: Array| -> RhaiRes {
            let lines: Vec<String> = evidence.into_iter().map(|d| d.to_string()).collect();
            out(critique_answer(&c, question, draft, Some(lines))
                .map(|(verdict, passed)| json!({ "verdict": verdict, "passed": passed })))
        },
    );

    // ── composites & progress ─────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn("research", move |query: &str| -> RhaiRes {
        out(research(&c, &[ResearchSpec::query(query)], 10))
    });
    let c = ctx.clone();
    engine.register_fn("research", move |query: &str, opts: Map| -> RhaiRes {
        let opts = map_to_value(opts);
        out(research(&c, &[opts_to_spec(query, &opts)], 10))
    });
    let c = ctx.clone();
    engine.register_fn("research", move |specs: Array| -> RhaiRes {
        let specs: Vec<ResearchSpec> = specs
            .into_iter()
            .map(|d| {
                let value: Value = rhai::serde::from_dynamic(&d).unwrap_or(Value::Null);
                match value {
                    Value::String(q) => ResearchSpec::query(q),
                    other => opts_to_spec("", &other),
                }
            })
            .collect();
        out(research(&c, &specs, 10))
    });

    let c = ctx.clone();
    engine.register_fn(
        "draft_answer",
        move |question: &str, results: Dynamic| -> RhaiRes {
            out(draft_answer(&c, question, &hits_from(results), None))
        },
    );
    let c = ctx.clone();
    engine.register_fn(
        "draft_answer",
        move |question: &str, results: Dynamic, instructions: &str| -> RhaiRes {
            out(draft_answer(&c, question, &hits_from(results), Some(instructions)))
        },
    );

    let c = ctx.clone();
    engine.register_fn("check_progress", move || -> RhaiRes {
        out(check_progress(&c))
    });

    engine.register_fn("format_evidence", move |results: Dynamic| -> RhaiRes {
        out(Ok(json!(format_evidence(&hits_from(results), 3))))
    });
    engine.register_fn(
        "format_evidence",
        move |results: Dynamic, max_per_source: i64| -> RhaiRes {
            out(Ok(json!(format_evidence(
                &hits_from(results),
                max_per_source.max(1) as usize
            ))))
        },
    );

    // ── delegation (conditional) ──────────────────────────────────
    if ctx.delegation.depth < ctx.delegation.max_delegation_depth {
        let c = ctx.clone();
        engine.register_fn("rlm_query", move |sub_question: &str| -> RhaiRes {
            out(rlm_query(&c, sub_question, ""))
        });
        let c = ctx.clone();
        engine.register_fn(
            "rlm_query",
            move |sub_question: &str, instructions: &str| -> RhaiRes {
                out(rlm_query(&c, sub_question, instructions))
            },
        );
    }

    // ── injected LM callables ─────────────────────────────────────
    let c = ctx.clone();
    engine.register_fn("llm_query", move |prompt: &str| -> RhaiRes {
        let started = std::time::Instant::now();
        match c.lm.completion_text(prompt) {
            Ok(response) => {
                c.calls
                    .record(prompt, &response, started.elapsed().as_secs_f64());
                Ok(response.into())
            }
            Err(e) => Err(e.to_string().into()),
        }
    });
    let c = ctx.clone();
    engine.register_fn("llm_query_batched", move |prompts: Array| -> RhaiRes {
        let prompts: Vec<String> = prompts.into_iter().map(|d| d.to_string()).collect();
        let started = std::time::Instant::now();
        let responses = c.lm.completion_batched(&prompts);
        let elapsed = started.elapsed().as_secs_f64();
        for (prompt, response) in prompts.iter().zip(&responses) {
            c.calls.record(prompt, response, elapsed);
        }
        out(Ok(json!(responses)))
    });

    // ── emit callback + live state accessors ──────────────────────
    let c = ctx.clone();
    engine.register_fn("emit_progress", move |message: &str| {
        c.bus.emit(
            braid_domain::EventKind::Progress,
            json!({ "message": message }),
        );
    });

    // The registry accessor reads through the live handle: hits written
    // by a tool earlier in the same fragment are already visible here.
    let registry = ctx.evidence.registry_handle();
    engine.register_fn("source_registry", move || -> RhaiRes {
        let map: serde_json::Map<String, Value> = registry
            .lock()
            .iter()
            .map(|(id, hit)| (id.clone(), serde_json::to_value(hit).unwrap_or(Value::Null)))
            .collect();
        out(Ok(Value::Object(map)))
    });

    let c = ctx.clone();
    engine.register_fn("search_log", move || -> RhaiRes {
        out(Ok(serde_json::to_value(c.evidence.search_log()).unwrap_or(Value::Null)))
    });
    let c = ctx.clone();
    engine.register_fn("tool_calls", move || -> RhaiRes {
        out(Ok(serde_json::to_value(c.tool_calls()).unwrap_or(Value::Null)))
    });
}

/// Default bootstrap script for a fresh sandbox.
pub fn setup_code() -> String {
    "// Scratch space persisted across iterations.\nlet notes = [];\n".to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Root agent instructions; `max_iterations` is interpolated so the
/// model can budget its searches.
pub fn system_prompt(max_iterations: usize) -> String {
    format!(
        r#"You are a research agent over a curated question-and-answer knowledge base.
You work in iterations ({max_iterations} maximum). Each turn, write code inside a
```repl fenced block; it runs in a persistent sandbox and its output comes back to
you next turn.

## Tools
- research(query) / research(query, #{{"filters": #{{...}}, "top_k": 10}}) — search,
  evaluate relevance, and deduplicate in one call. Start here.
- search(query, filters, top_k), search_multi(query), browse(#{{"filters": ...}}) —
  lower-level retrieval when you need precise control.
- lookup(term) — terminology bridge for unfamiliar or non-English terms.
- evaluate_results(question, results), reformulate(question, failed_query) —
  rate and recover from weak result sets.
- draft_answer(question, results) — synthesize a cited answer, critique it, and
  revise once if needed.
- critique_answer(question, draft) — re-check a draft on demand.
- check_progress() — confidence, phase, and a concrete next step.
- kb_overview(), classification() — the taxonomy and your query's pre-classification.
- rlm_query(sub_question) — delegate a focused sub-question to a child agent
  (when available).

## Workflow
1. research() with 1-2 targeted queries (use classification() filters if helpful).
2. check_progress() — follow its guidance.
3. When evidence suffices, draft_answer() and store the result:
   let draft = draft_answer(question, results);
   let answer = draft.answer;
4. Finish with FINAL_VAR(answer) on its own line (outside code fences), or
   FINAL(<short answer>) for trivial cases.

Cite sources as [Source: <id>] — only ids present in source_registry().
Do not answer from your own knowledge; everything must come from the corpus."#
    )
}

/// Instructions for delegated sub-agents: one focused question, a tight
/// budget, no further delegation.
pub const SUB_AGENT_SYSTEM_PROMPT: &str = r#"You are a focused research sub-agent over a curated Q&A knowledge base.

Research ONE specific sub-question and provide a grounded answer.

## Workflow
1. research(sub_question) — one or two targeted queries.
2. check_progress() — if ready, draft.
3. draft_answer(...), then FINAL_VAR(answer) on its own line.

Keep it focused: you have a small iteration budget. Aim for 2-3 code blocks total.
Cite sources as [Source: <id>]."#;
