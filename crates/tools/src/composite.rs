//! Composite tools: `research` (search → evaluate → dedup in one call)
//! and `draft_answer` (synthesize → critique → revise once).

use braid_domain::error::{Error, Result};
use braid_domain::{Hit, RatingLabel};
use serde_json::{json, Map, Value};

use crate::api_tools::{clip, search, search_multi};
use crate::context::SearchContext;
use crate::format::format_evidence;
use crate::progress::check_progress;
use crate::subagent::{critique_answer, evaluate_results};
use crate::tracker::track;
use crate::EVAL_BATCH_CAP;

/// One search task inside a `research` call.
#[derive(Debug, Clone, Default)]
pub struct ResearchSpec {
    pub query: String,
    pub filters: Option<Value>,
    pub top_k: Option<usize>,
    /// Extra searches run alongside the main query (string-query mode).
    pub extra_queries: Vec<ResearchSpec>,
}

impl ResearchSpec {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// research
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Search, evaluate relevance, and deduplicate in one call.
///
/// Runs every spec (plus its `extra_queries`), merges hits by id with the
/// higher score winning, and evaluates only hits that are new — unrated,
/// or previously rated OFF-TOPIC (a different query may rehabilitate
/// them). OFF-TOPIC hits are filtered from the returned set but stay in
/// the registry. Individual search failures are collected into `errors`;
/// only cancellation unwinds.
pub fn research(ctx: &SearchContext, specs: &[ResearchSpec], default_top_k: usize) -> Result<Value> {
    if specs.is_empty() {
        ctx.print("[research] WARNING: empty query list");
        return Ok(json!({
            "results": [],
            "ratings": {},
            "search_count": 0,
            "eval_summary": "no queries provided",
        }));
    }

    let args_query = if specs.len() == 1 && specs[0].extra_queries.is_empty() {
        specs[0].query.clone()
    } else {
        format!("{} specs", specs.len())
    };

    track(
        ctx,
        "research",
        json!({ "query": args_query, "top_k": default_top_k }),
        |tc| {
            let eval_question: String = specs
                .iter()
                .map(|s| s.query.as_str())
                .collect::<Vec<_>>()
                .join(" ; ");

            // ── Fan out the searches ───────────────────────────────
            let mut all_results: Vec<Hit> = Vec::new();
            let mut search_count = 0usize;
            let mut errors: Vec<String> = Vec::new();

            let mut run_one = |spec: &ResearchSpec| -> Result<()> {
                ctx.bus.raise_if_cancelled()?;
                let top_k = spec.top_k.unwrap_or(default_top_k);
                let outcome = if ctx.multi_mode {
                    search_multi(ctx, &spec.query, spec.filters.clone(), top_k)
                } else {
                    search(ctx, &spec.query, spec.filters.clone(), top_k)
                };
                match outcome {
                    Ok(body) => {
                        if let Ok(hits) =
                            serde_json::from_value::<Vec<Hit>>(body["results"].clone())
                        {
                            all_results.extend(hits);
                        }
                        search_count += 1;
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        ctx.print(&format!("[research] WARNING: search failed: {e}"));
                        errors.push(e.to_string());
                    }
                }
                Ok(())
            };

            for spec in specs {
                run_one(spec)?;
                for extra in &spec.extra_queries {
                    run_one(extra)?;
                }
            }

            if all_results.is_empty() {
                ctx.print("[research] ERROR: all searches failed");
                tc.set_summary(json!({
                    "search_count": search_count,
                    "raw": 0,
                    "unique": 0,
                    "filtered": 0,
                    "eval_summary": "no results",
                }));
                let mut out = json!({
                    "results": [],
                    "ratings": {},
                    "search_count": search_count,
                    "eval_summary": "no results",
                });
                attach_errors(&mut out, &errors);
                return Ok(out);
            }

            // ── Dedup by id, higher score wins, sort by score desc ─
            let raw_count = all_results.len();
            let mut seen: std::collections::HashMap<String, Hit> = Default::default();
            for hit in all_results {
                match seen.get(&hit.id) {
                    Some(existing) if existing.score >= hit.score => {}
                    _ => {
                        seen.insert(hit.id.clone(), hit);
                    }
                }
            }
            let mut deduped: Vec<Hit> = seen.into_values().collect();
            deduped.sort_by(|a, b| b.score.total_cmp(&a.score));

            // ── New vs prior (cross-call rating cache) ─────────────
            let new_results: Vec<Hit> = deduped
                .iter()
                .filter(|hit| {
                    match ctx.evidence.get_rating(&hit.id) {
                        None => true,
                        Some(r) => r.rating == RatingLabel::OffTopic,
                    }
                })
                .cloned()
                .collect();
            let prior_rated = deduped.len() - new_results.len();

            if !new_results.is_empty() {
                let capped: Vec<Hit> =
                    new_results.iter().take(EVAL_BATCH_CAP).cloned().collect();
                match evaluate_results(ctx, &eval_question, &capped, EVAL_BATCH_CAP) {
                    Ok(_) => {}
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        ctx.print(&format!(
                            "[research] WARNING: evaluation failed, returning unrated: {e}"
                        ));
                    }
                }
            } else if prior_rated > 0 {
                ctx.print(&format!(
                    "[research] all {} results already rated — skipping evaluation",
                    deduped.len()
                ));
            }

            // ── Filter OFF-TOPIC from the returned set ─────────────
            let mut ratings = Map::new();
            let mut relevant = 0usize;
            let mut partial = 0usize;
            let mut off_topic = 0usize;
            for hit in &deduped {
                if let Some(r) = ctx.evidence.get_rating(&hit.id) {
                    ratings.insert(hit.id.clone(), json!(r.rating.as_str()));
                    match r.rating {
                        RatingLabel::Relevant => relevant += 1,
                        RatingLabel::Partial => partial += 1,
                        RatingLabel::OffTopic => off_topic += 1,
                        RatingLabel::Unknown => {}
                    }
                }
            }
            let filtered: Vec<&Hit> = deduped
                .iter()
                .filter(|hit| {
                    ctx.evidence
                        .get_rating(&hit.id)
                        .map(|r| r.rating != RatingLabel::OffTopic)
                        .unwrap_or(true)
                })
                .collect();

            let mut eval_summary =
                format!("{relevant} relevant, {partial} partial, {off_topic} off-topic");
            if !new_results.is_empty() && prior_rated > 0 {
                eval_summary.push_str(&format!(
                    " ({} new, {prior_rated} prior)",
                    new_results.len()
                ));
            }

            ctx.print(&format!(
                "[research] {search_count} searches | {raw_count} raw > {} unique > {} filtered",
                deduped.len(),
                filtered.len()
            ));
            ctx.print(&format!("[research] {eval_summary}"));
            for hit in filtered.iter().take(5) {
                let tag = ctx
                    .evidence
                    .get_rating(&hit.id)
                    .map(|r| r.rating.as_str())
                    .unwrap_or("-");
                ctx.print(&format!(
                    "  [{}] {:.2} {tag:<10} Q: {}",
                    hit.id,
                    hit.score,
                    clip(&hit.question, 100)
                ));
            }
            if filtered.len() > 5 {
                ctx.print(&format!("  ... and {} more", filtered.len() - 5));
            }

            tc.set_summary(json!({
                "search_count": search_count,
                "raw": raw_count,
                "unique": deduped.len(),
                "new_evaluated": new_results.len().min(EVAL_BATCH_CAP),
                "prior_rated": prior_rated,
                "filtered": filtered.len(),
                "eval_summary": eval_summary,
            }));

            // ── Post-research progress hint ────────────────────────
            if let Ok(progress) = check_progress(ctx) {
                match progress["phase"].as_str().unwrap_or("") {
                    "ready" => ctx.print(&format!(
                        "\n>>> PROGRESS: Evidence sufficient (confidence {}%). Call \
                         draft_answer() now.",
                        progress["confidence"]
                    )),
                    "finalize" => ctx.print(
                        "\n>>> PROGRESS: Draft complete. Call FINAL_VAR(answer) to finish.",
                    ),
                    "stalled" | "repeating" => ctx.print(&format!(
                        "\n>>> PROGRESS: {}",
                        progress["guidance"].as_str().unwrap_or("")
                    )),
                    _ => {}
                }
            }

            let mut out = json!({
                "results": filtered.iter().map(|h| serde_json::to_value(h).unwrap_or(Value::Null)).collect::<Vec<_>>(),
                "ratings": Value::Object(ratings),
                "search_count": search_count,
                "eval_summary": eval_summary,
            });
            attach_errors(&mut out, &errors);
            Ok(out)
        },
    )
}

fn attach_errors(out: &mut Value, errors: &[String]) {
    if !errors.is_empty() {
        out["errors"] = json!(errors);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// draft_answer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synthesize an answer from results, critique it, and revise at most
/// once on a failing critique. Draft length and critique outcome land on
/// the quality gate.
pub fn draft_answer(
    ctx: &SearchContext,
    question: &str,
    results: &[Hit],
    instructions: Option<&str>,
) -> Result<Value> {
    let evidence = format_evidence(&results[..results.len().min(20)], 3);
    if evidence.is_empty() {
        ctx.print("[draft_answer] ERROR: no evidence to synthesize from");
        return Ok(json!({ "answer": "", "critique": "", "passed": false, "revised": false }));
    }

    track(
        ctx,
        "draft_answer",
        json!({ "question": clip(question, 100), "num_results": results.len() }),
        |tc| {
            let evidence_text = evidence.join("\n");
            let mut prompt = format!(
                "Synthesize a comprehensive, well-structured answer from the evidence \
                 below.\n\n\
                 VOICE:\n\
                 - Present the assembled guidance of the curated corpus, not your own \
                 analysis.\n\
                 - State conclusions declaratively; uncertainty belongs in the \
                 confidence assessment, not the answer body.\n\
                 - Define specialist terms parenthetically on first use.\n\
                 - No preamble; start directly with the answer.\n\n\
                 QUESTION:\n{question}\n\n\
                 EVIDENCE:\n{evidence_text}\n\n"
            );
            if let Some(extra) = instructions {
                prompt.push_str(&format!("INSTRUCTIONS:\n{extra}\n\n"));
            }
            prompt.push_str(
                "FORMAT:\n\
                 ## Answer\n\
                 Grounded answer with [Source: <id>] citations after each claim.\n\n\
                 ## Sources Consulted\n\
                 One line per source cited.\n\n\
                 ## Confidence Assessment\n\
                 High / Medium / Low with one sentence of justification.\n\n\
                 Only cite ids from the evidence. Flag gaps explicitly instead of \
                 guessing.",
            );

            let mut answer = ctx.lm.completion_text(&prompt)?;
            let (mut critique, mut passed) =
                critique_answer(ctx, question, &answer, Some(evidence.clone()))?;
            let mut revised = false;

            if !passed {
                let revision_prompt = format!(
                    "Revise this answer based on the critique.\n\n\
                     CRITIQUE:\n{critique}\n\n\
                     ORIGINAL:\n{answer}\n\n\
                     EVIDENCE:\n{evidence_text}\n\n\
                     Fix the flagged issues, keep valid citations, keep the same \
                     format. Return ONLY the revised answer, starting directly with \
                     ## Answer — no commentary about what changed."
                );
                answer = ctx.lm.completion_text(&revision_prompt)?;
                let outcome = critique_answer(ctx, question, &answer, Some(evidence.clone()))?;
                critique = outcome.0;
                passed = outcome.1;
                revised = true;
            }

            ctx.quality.record_draft(answer.len());

            ctx.print(&format!(
                "[draft_answer] {}{} | {} chars | {} evidence entries",
                if passed { "PASS" } else { "FAIL" },
                if revised { " (revised)" } else { "" },
                answer.len(),
                evidence.len()
            ));
            tc.set_summary(json!({
                "passed": passed,
                "revised": revised,
                "answer_length": answer.len(),
                "answer_preview": clip(&answer, 300),
                "critique_verdict": if passed { "PASS" } else { "FAIL" },
            }));
            Ok(json!({
                "answer": answer,
                "critique": critique,
                "passed": passed,
                "revised": revised,
            }))
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{context_with, FakeCascade, FakeLm};
    use std::sync::Arc;

    fn hit(id: &str, score: f64) -> Hit {
        Hit {
            id: id.into(),
            score,
            question: format!("q {id}"),
            answer: format!("a {id}"),
            metadata: Default::default(),
        }
    }

    // ── research ──────────────────────────────────────────────────

    #[test]
    fn research_merges_dedups_and_evaluates() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("1", 0.9), ("2", 0.5)]);
        api.queue_hits(&[("2", 0.8), ("3", 0.7)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[1] RELEVANT CONFIDENCE:5\n[2] RELEVANT CONFIDENCE:4\n[3] OFF-TOPIC CONFIDENCE:4");
        let ctx = context_with(api, lm);

        let specs = vec![
            ResearchSpec::query("main question"),
            ResearchSpec::query("second angle"),
        ];
        let out = research(&ctx, &specs, 10).unwrap();

        assert_eq!(out["search_count"], 2);
        // 4 raw, 3 unique, off-topic filtered out of the returned set.
        let results = out["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        // Higher score won the dedup for id 2.
        let id2 = results.iter().find(|r| r["id"] == "2").unwrap();
        assert_eq!(id2["score"], 0.8);
        // Sorted descending.
        assert_eq!(results[0]["id"], "1");
        // Off-topic stays in the registry.
        assert!(ctx.evidence.get("3").is_some());
        assert_eq!(out["ratings"]["3"], "OFF-TOPIC");
    }

    #[test]
    fn research_skips_already_rated_ids() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("1", 0.9), ("2", 0.8)]);
        api.queue_hits(&[("1", 0.9), ("2", 0.8), ("3", 0.7)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[1] RELEVANT CONFIDENCE:5\n[2] PARTIAL CONFIDENCE:3");
        lm.push_response("[3] RELEVANT CONFIDENCE:4");
        let ctx = context_with(api, lm.clone());

        research(&ctx, &[ResearchSpec::query("first")], 10).unwrap();
        let out = research(&ctx, &[ResearchSpec::query("second")], 10).unwrap();

        // Second call evaluated only the new id 3.
        let second_eval_prompt = lm.prompts.lock().last().cloned().unwrap();
        assert!(second_eval_prompt.contains("[3]"));
        assert!(!second_eval_prompt.contains("[1]"));
        assert!(out["eval_summary"].as_str().unwrap().contains("prior"));
    }

    #[test]
    fn research_re_evaluates_prior_off_topic() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("9", 0.6)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[9] RELEVANT CONFIDENCE:4");
        let ctx = context_with(api, lm.clone());

        // Rated off-topic by an earlier query.
        ctx.evidence.register_hit(hit("9", 0.6));
        ctx.evidence.set_rating("9", RatingLabel::OffTopic, 4);

        let out = research(&ctx, &[ResearchSpec::query("different angle")], 10).unwrap();
        // Re-evaluated and rehabilitated.
        assert_eq!(
            ctx.evidence.get_rating("9").unwrap().rating,
            RatingLabel::Relevant
        );
        assert_eq!(out["results"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn research_swallows_individual_search_failures() {
        let api = Arc::new(FakeCascade::default());
        api.queue_error("connect refused");
        api.queue_hits(&[("1", 0.9)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[1] RELEVANT CONFIDENCE:5");
        let ctx = context_with(api, lm);

        let specs = vec![ResearchSpec::query("bad"), ResearchSpec::query("good")];
        let out = research(&ctx, &specs, 10).unwrap();
        assert_eq!(out["search_count"], 1);
        assert_eq!(out["errors"].as_array().unwrap().len(), 1);
        assert_eq!(out["results"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn research_returns_empty_when_all_fail() {
        let api = Arc::new(FakeCascade::default());
        api.queue_error("down");
        api.queue_error("down");
        let ctx = context_with(api, Arc::new(FakeLm::default()));

        let specs = vec![ResearchSpec::query("a"), ResearchSpec::query("b")];
        let out = research(&ctx, &specs, 10).unwrap();
        assert_eq!(out["search_count"], 0);
        assert!(out["results"].as_array().unwrap().is_empty());
        assert_eq!(out["errors"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn research_propagates_cancellation() {
        let api = Arc::new(FakeCascade::default());
        let ctx = context_with(api, Arc::new(FakeLm::default()));
        ctx.bus.bus().cancel();
        let err = research(&ctx, &[ResearchSpec::query("q")], 10).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn research_caps_evaluation_batch() {
        let api = Arc::new(FakeCascade::default());
        let many: Vec<(String, f64)> = (0..30).map(|i| (i.to_string(), 0.9 - i as f64 * 0.01)).collect();
        let refs: Vec<(&str, f64)> = many.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        api.queue_hits(&refs);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("nothing parseable here");
        let ctx = context_with(api, lm.clone());

        research(&ctx, &[ResearchSpec::query("q")], 30).unwrap();
        // Fallback went per-result over at most EVAL_BATCH_CAP prompts.
        assert_eq!(lm.batched_prompts.lock()[0].len(), EVAL_BATCH_CAP);
    }

    #[test]
    fn research_runs_extra_queries() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("1", 0.9)]);
        api.queue_hits(&[("2", 0.8)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[1] RELEVANT\n[2] RELEVANT");
        let ctx = context_with(api.clone(), lm);

        let mut spec = ResearchSpec::query("main");
        spec.extra_queries.push(ResearchSpec::query("extra"));
        let out = research(&ctx, &[spec], 10).unwrap();
        assert_eq!(out["search_count"], 2);
        assert_eq!(api.search_requests.lock().len(), 2);
    }

    #[test]
    fn research_prints_ready_hint_when_evidence_suffices() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("1", 0.9), ("2", 0.9), ("3", 0.9)]);
        let lm = Arc::new(FakeLm::default());
        lm.push_response("[1] RELEVANT CONFIDENCE:5\n[2] RELEVANT CONFIDENCE:5\n[3] RELEVANT CONFIDENCE:5");
        let ctx = context_with(api, lm);

        research(&ctx, &[ResearchSpec::query("q")], 10).unwrap();
        let stdout = ctx.output.take();
        assert!(stdout.contains(">>> PROGRESS: Evidence sufficient"));
    }

    // ── draft_answer ──────────────────────────────────────────────

    #[test]
    fn draft_passes_first_try() {
        let lm = Arc::new(FakeLm::default());
        lm.push_response("## Answer\nThe ruling is X [Source: 1].");
        lm.push_batched(&["PASS", "PASS"]);
        let ctx = context_with(Arc::new(FakeCascade::default()), lm);

        let out = draft_answer(&ctx, "q", &[hit("1", 0.9)], None).unwrap();
        assert_eq!(out["passed"], true);
        assert_eq!(out["revised"], false);
        assert!(ctx.quality.has_draft());
        assert_eq!(ctx.quality.last_critique_passed(), Some(true));
    }

    #[test]
    fn draft_revises_once_on_failed_critique() {
        let lm = Arc::new(FakeLm::default());
        lm.push_response("draft v1");
        lm.push_batched(&["FAIL — missing citation", "PASS"]);
        lm.push_response("draft v2 [Source: 1]");
        lm.push_batched(&["PASS", "PASS"]);
        let ctx = context_with(Arc::new(FakeCascade::default()), lm.clone());

        let out = draft_answer(&ctx, "q", &[hit("1", 0.9)], None).unwrap();
        assert_eq!(out["revised"], true);
        assert_eq!(out["passed"], true);
        assert_eq!(out["answer"], "draft v2 [Source: 1]");
        // Exactly two synthesis calls (original + one revision).
        assert_eq!(lm.prompts.lock().len(), 2);
    }

    #[test]
    fn draft_without_evidence_short_circuits() {
        let ctx = context_with(Arc::new(FakeCascade::default()), Arc::new(FakeLm::default()));
        let out = draft_answer(&ctx, "q", &[], None).unwrap();
        assert_eq!(out["passed"], false);
        assert_eq!(out["answer"], "");
        assert!(ctx.tool_calls().is_empty());
    }

    #[test]
    fn draft_tool_tree_nests_critiques() {
        let lm = Arc::new(FakeLm::default());
        lm.push_response("draft");
        lm.push_batched(&["PASS", "PASS"]);
        let ctx = context_with(Arc::new(FakeCascade::default()), lm);

        draft_answer(&ctx, "q", &[hit("1", 0.9)], None).unwrap();
        let calls = ctx.tool_calls();
        assert_eq!(calls[0].tool, "draft_answer");
        let child = calls[0].children[0];
        assert_eq!(calls[child].tool, "critique_answer");
    }
}
