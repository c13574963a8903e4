//! LM-backed sub-agent tools: relevance evaluation, query reformulation,
//! draft critique, and the one-shot bootstrap classification.

use braid_domain::error::Result;
use braid_domain::{ClassConfidence, Classification, EventKind, Hit, RatingLabel};
use serde_json::{json, Value};

use crate::api_tools::clip;
use crate::context::SearchContext;
use crate::format::format_evidence;
use crate::tracker::track;
use crate::MAX_DRAFT_LEN;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// evaluate_results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RatedHit {
    pub id: String,
    pub rating: RatingLabel,
    pub confidence: u8,
}

/// Rate up to `top_n` hits for relevance to `question`.
///
/// Tries one batch prompt first (`[id] RATING CONFIDENCE:N` per line);
/// when fewer than half the expected ids parse, falls back to one prompt
/// per candidate via the batched LM call. Ratings land in the evidence
/// store either way.
pub fn evaluate_results(
    ctx: &SearchContext,
    question: &str,
    results: &[Hit],
    top_n: usize,
) -> Result<Value> {
    if results.is_empty() {
        return Ok(json!({
            "ratings": [],
            "suggestion": "No results to evaluate. Try a different query or remove filters.",
            "raw": "",
        }));
    }

    track(
        ctx,
        "evaluate_results",
        json!({ "question": clip(question, 100), "top_n": top_n }),
        |tc| {
            let candidates: Vec<&Hit> = results.iter().take(top_n).collect();

            // ── Attempt 1: one batch prompt ────────────────────────
            let raw = ctx.lm.completion_text(&batch_prompt(question, &candidates))?;
            let mut parsed = parse_batch_response(&raw, &candidates);
            let parsed_ids = parsed.iter().filter(|r| r.rating != RatingLabel::Unknown
                || r.confidence > 0).count();

            // ── Attempt 2: per-result fallback ─────────────────────
            let mut raw_out = raw;
            if parsed_ids * 2 < candidates.len() {
                ctx.print(&format!(
                    "[evaluate_results] batch parse got {parsed_ids}/{} — falling back to \
                     per-result evaluation",
                    candidates.len()
                ));
                let prompts: Vec<String> = candidates
                    .iter()
                    .map(|hit| single_prompt(question, hit))
                    .collect();
                let responses = ctx.lm.completion_batched(&prompts);
                parsed = candidates
                    .iter()
                    .zip(&responses)
                    .map(|(hit, resp)| parse_single_response(&hit.id, resp))
                    .collect();
                raw_out = responses.join("\n---\n");
            }

            for r in &parsed {
                ctx.evidence.set_rating(&r.id, r.rating, r.confidence);
            }

            let relevant = count(&parsed, RatingLabel::Relevant);
            let partial = count(&parsed, RatingLabel::Partial);
            let off_topic = count(&parsed, RatingLabel::OffTopic);
            let unknown = count(&parsed, RatingLabel::Unknown);

            let suggestion = if relevant >= 3 {
                "Proceed to synthesis"
            } else if relevant >= 1 || partial >= 2 {
                "Consider examining partial matches or refining"
            } else {
                "Refine the query"
            };

            let mut summary = format!("{relevant} relevant, {partial} partial, {off_topic} off-topic");
            if unknown > 0 {
                summary.push_str(&format!(", {unknown} unknown"));
            }
            ctx.print(&format!("[evaluate_results] {} rated: {summary}", parsed.len()));
            ctx.print(&format!("[evaluate_results] suggestion: {suggestion}"));

            let ratings_json: Vec<Value> = parsed
                .iter()
                .map(|r| json!({ "id": r.id, "rating": r.rating.as_str(), "confidence": r.confidence }))
                .collect();
            tc.set_summary(json!({
                "num_rated": parsed.len(),
                "relevant": relevant,
                "partial": partial,
                "off_topic": off_topic,
                "ratings": ratings_json,
            }));
            Ok(json!({ "ratings": ratings_json, "suggestion": suggestion, "raw": raw_out }))
        },
    )
}

fn count(ratings: &[RatedHit], label: RatingLabel) -> usize {
    ratings.iter().filter(|r| r.rating == label).count()
}

fn batch_prompt(question: &str, candidates: &[&Hit]) -> String {
    let mut prompt = format!(
        "Evaluate these search results for the question:\n\"{question}\"\n\n"
    );
    for hit in candidates {
        prompt.push_str(&format!(
            "[{}] score={:.2}\nQ: {}\nA: {}\n\n",
            hit.id,
            hit.score,
            clip(&hit.question, 300),
            clip(&hit.answer, 1000),
        ));
    }
    prompt.push_str(
        "Respond with exactly one line per result, nothing else:\n\
         [id] RELEVANT|PARTIAL|OFF-TOPIC CONFIDENCE:<1-5>\n\
         RELEVANT = directly answers the question\n\
         PARTIAL = related but incomplete\n\
         OFF-TOPIC = not about this question",
    );
    prompt
}

fn single_prompt(question: &str, hit: &Hit) -> String {
    format!(
        "Evaluate this search result for the question:\n\"{question}\"\n\n\
         Result [{}] score={:.2}\nQ: {}\nA: {}\n\n\
         Respond with exactly one line: RELEVANT|PARTIAL|OFF-TOPIC followed by \
         CONFIDENCE:<1-5>\n\
         RELEVANT = directly answers the question\n\
         PARTIAL = related but incomplete\n\
         OFF-TOPIC = not about this question",
        hit.id,
        hit.score,
        clip(&hit.question, 300),
        clip(&hit.answer, 1000),
    )
}

/// Parse the batch response into one entry per candidate, preserving
/// candidate order. Ids not found in the response rate UNKNOWN with
/// confidence 0.
fn parse_batch_response(raw: &str, candidates: &[&Hit]) -> Vec<RatedHit> {
    candidates
        .iter()
        .map(|hit| {
            let needle = format!("[{}]", hit.id);
            raw.lines()
                .find(|line| line.contains(&needle))
                .map(|line| parse_single_response(&hit.id, line))
                .unwrap_or_else(|| RatedHit {
                    id: hit.id.clone(),
                    rating: RatingLabel::Unknown,
                    confidence: 0,
                })
        })
        .collect()
}

/// Parse one rating line. Accepts `OFF-TOPIC` or `OFF_TOPIC`; confidence
/// defaults to 3 when missing and clamps to [1, 5].
fn parse_single_response(id: &str, response: &str) -> RatedHit {
    let trimmed = response.trim();
    if trimmed.starts_with("Error:") {
        return RatedHit {
            id: id.to_string(),
            rating: RatingLabel::Unknown,
            confidence: 0,
        };
    }
    let upper = trimmed.to_uppercase();
    let rating = if upper.contains("OFF-TOPIC") || upper.contains("OFF_TOPIC") {
        RatingLabel::OffTopic
    } else if upper.contains("PARTIAL") {
        RatingLabel::Partial
    } else if upper.contains("RELEVANT") {
        RatingLabel::Relevant
    } else {
        RatingLabel::Unknown
    };

    let confidence = upper
        .split("CONFIDENCE:")
        .nth(1)
        .and_then(|rest| rest.trim().chars().next())
        .and_then(|c| c.to_digit(10))
        .map(|d| (d as u8).clamp(1, 5))
        .unwrap_or(3);

    RatedHit {
        id: id.to_string(),
        rating,
        confidence,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// reformulate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generate up to 3 alternative queries when results are poor.
pub fn reformulate(
    ctx: &SearchContext,
    question: &str,
    failed_query: &str,
    top_score: f64,
) -> Result<Vec<String>> {
    track(
        ctx,
        "reformulate",
        json!({ "failed_query": clip(failed_query, 100), "top_score": top_score }),
        |tc| {
            let prompt = format!(
                "The search query \"{failed_query}\" returned poor results (best score: \
                 {top_score:.2}) for the question:\n\"{question}\"\n\n\
                 Generate exactly 3 alternative search queries that might find better \
                 results.\nOne query per line, no numbering, no quotes, no explanation."
            );
            let response = ctx.lm.completion_text(&prompt)?;
            let queries: Vec<String> = response
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .take(3)
                .map(String::from)
                .collect();
            ctx.print(&format!("[reformulate] generated {} queries", queries.len()));
            tc.set_summary(json!({ "num_queries": queries.len(), "queries": queries }));
            Ok(queries)
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// critique_answer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dual-reviewer critique of a draft: a content expert and a citation
/// auditor run as one batched LM call; the draft passes only when both
/// verdicts begin with PASS. The outcome is recorded on the quality gate.
///
/// `evidence` grounds the review; when absent, the current live registry
/// (top 20 by score) is formatted instead.
pub fn critique_answer(
    ctx: &SearchContext,
    question: &str,
    draft: &str,
    evidence: Option<Vec<String>>,
) -> Result<(String, bool)> {
    track(
        ctx,
        "critique_answer",
        json!({ "question": clip(question, 100) }),
        |tc| {
            if draft.len() > MAX_DRAFT_LEN {
                ctx.print(&format!(
                    "[critique_answer] WARNING: draft truncated from {} to {MAX_DRAFT_LEN} chars",
                    draft.len()
                ));
            }
            let draft = clip(draft, MAX_DRAFT_LEN);

            let evidence_lines = evidence.unwrap_or_else(|| {
                let mut hits: Vec<Hit> = ctx.evidence.snapshot().into_values().collect();
                hits.sort_by(|a, b| b.score.total_cmp(&a.score));
                hits.truncate(20);
                format_evidence(&hits, 3)
            });
            let evidence_text = evidence_lines.join("\n");

            let content_prompt = format!(
                "You are a content expert. Review this draft answer to the question:\n\
                 \"{question}\"\n\nDraft:\n{draft}\n\nEVIDENCE:\n{evidence_text}\n\n\
                 Check:\n\
                 1. Does it answer the actual question asked?\n\
                 2. Is every claim supported by the evidence, with nothing fabricated?\n\
                 3. Is anything important from the evidence missing?\n\
                 4. Are rulings stated declaratively rather than hedged with 'it may be'?\n\n\
                 Respond: PASS or FAIL, then brief feedback (under 100 words)."
            );
            let citation_prompt = format!(
                "You are a citation auditor. Review this draft answer to the question:\n\
                 \"{question}\"\n\nDraft:\n{draft}\n\nEVIDENCE:\n{evidence_text}\n\n\
                 Check:\n\
                 1. Are [Source: <id>] citations present for factual claims?\n\
                 2. Does each cited id exist in the evidence, and does the claim match \
                 what that source says?\n\
                 3. Are there key claims without any citation?\n\n\
                 Respond: PASS or FAIL, then brief feedback (under 100 words)."
            );

            let responses = ctx
                .lm
                .completion_batched(&[content_prompt, citation_prompt]);
            let content_verdict = responses.first().cloned().unwrap_or_else(|| "Error: no response".into());
            let citation_verdict = responses.get(1).cloned().unwrap_or_else(|| "Error: no response".into());

            let content_passed = verdict_passes(&content_verdict);
            let citation_passed = verdict_passes(&citation_verdict);
            let passed = content_passed && citation_passed;

            let mut failed = Vec::new();
            if !content_passed {
                failed.push("content");
            }
            if !citation_passed {
                failed.push("citations");
            }
            ctx.print(&format!(
                "[critique_answer] dual-review verdict={}{}",
                if passed { "PASS" } else { "FAIL" },
                if failed.is_empty() {
                    String::new()
                } else {
                    format!(" (failed: {})", failed.join(", "))
                }
            ));

            let combined = format!("CONTENT: {content_verdict}\n\nCITATIONS: {citation_verdict}");
            ctx.quality.record_critique(passed, &combined);

            tc.set_summary(json!({
                "verdict": if passed { "PASS" } else { "FAIL" },
                "content_passed": content_passed,
                "citation_passed": citation_passed,
                "failed": failed,
            }));
            Ok((combined, passed))
        },
    )
}

/// A verdict passes when it begins with PASS, case-insensitive, after
/// stripping emphasis markers.
pub fn verdict_passes(verdict: &str) -> bool {
    verdict
        .trim_start_matches(|c: char| c == '*' || c == '_' || c == '#' || c.is_whitespace())
        .to_uppercase()
        .starts_with("PASS")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// init_classify
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classify the query against the taxonomy at session bootstrap — zero
/// iteration cost from the loop's perspective. On any failure the
/// classification stays `None` and the session continues.
pub fn init_classify(ctx: &SearchContext, question: &str) {
    let Some(overview) = ctx.kb_overview.clone() else {
        ctx.set_classification(None);
        return;
    };

    ctx.bus.emit(
        EventKind::Progress,
        json!({ "stage": "classifying", "message": "Pre-classifying query" }),
    );
    let started = std::time::Instant::now();

    let outcome = track(
        ctx,
        "init_classify",
        json!({ "question": clip(question, 100) }),
        |tc| {
            let mut cat_lines = Vec::new();
            for (code, cat) in &overview.categories {
                let clusters: Vec<&str> = cat
                    .clusters
                    .iter()
                    .take(10)
                    .map(|c| c.value.as_str())
                    .collect();
                let mut line = format!("{code} — {}: {}", cat.name, clusters.join(", "));
                if let Some(sample) = cat.sample_questions.first() {
                    line.push_str(&format!(" (e.g. \"{sample}\")"));
                }
                cat_lines.push(line);
            }

            let prompt = format!(
                "Classify this question into one of these categories and suggest search \
                 filters.\n\nQuestion: \"{question}\"\n\n\
                 Categories and their clusters:\n{}\n\n\
                 Respond with exactly (no other text):\n\
                 CATEGORY: <code>\n\
                 CONFIDENCE: HIGH|MEDIUM|LOW\n\
                 CLUSTERS: <comma-separated relevant cluster labels from the list above>\n\
                 FILTERS: <json dict, e.g. {{\"parent_code\": \"PT\"}}>\n\
                 STRATEGY: <1 sentence search plan>",
                cat_lines.join("\n")
            );

            let lm = ctx.classify_lm.as_ref().unwrap_or(&ctx.lm);
            let raw = lm.completion_text(&prompt)?;
            let classification = parse_classification(&raw, &overview);

            let elapsed_ms = started.elapsed().as_millis() as u64;
            ctx.print(&format!(
                "[classify] category={} time={elapsed_ms}ms",
                classification.category
            ));
            tc.set_summary(json!({
                "category": classification.category,
                "clusters": classification.clusters,
                "duration_ms": elapsed_ms,
            }));
            Ok(classification)
        },
    );

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(classification) => {
            ctx.bus.emit(
                EventKind::Progress,
                json!({
                    "stage": "classified",
                    "message": format!("Pre-classified in {elapsed_ms}ms"),
                    "duration_ms": elapsed_ms,
                    "classification": serde_json::to_value(&classification).unwrap_or(Value::Null),
                }),
            );
            ctx.set_classification(Some(classification));
        }
        Err(e) => {
            tracing::warn!(error = %e, "pre-classification failed, proceeding without");
            ctx.print(&format!("[classify] FAILED: {e}"));
            ctx.set_classification(None);
            ctx.bus.emit(
                EventKind::Progress,
                json!({
                    "stage": "classified",
                    "message": format!("Classification skipped ({elapsed_ms}ms)"),
                    "duration_ms": elapsed_ms,
                }),
            );
        }
    }
}

/// Tolerant line parser for the classification response. Cluster labels
/// that do not exist in the overview are dropped.
fn parse_classification(raw: &str, overview: &crate::kb::KbOverview) -> Classification {
    let mut category = String::new();
    let mut confidence = ClassConfidence::Medium;
    let mut clusters = String::new();
    let mut filters = Value::Object(Default::default());
    let mut strategy = String::new();

    for line in raw.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        if let Some(rest) = field_value(line, &upper, "CATEGORY:") {
            category = rest;
        } else if let Some(rest) = field_value(line, &upper, "CONFIDENCE:") {
            let rest = rest.to_uppercase();
            confidence = if rest.contains("HIGH") {
                ClassConfidence::High
            } else if rest.contains("LOW") {
                ClassConfidence::Low
            } else {
                ClassConfidence::Medium
            };
        } else if let Some(rest) = field_value(line, &upper, "CLUSTERS:") {
            let kept: Vec<&str> = rest
                .split(',')
                .map(str::trim)
                .filter(|label| !label.is_empty() && overview.has_cluster(label))
                .collect();
            clusters = kept.join(", ");
        } else if let Some(rest) = field_value(line, &upper, "FILTERS:") {
            filters = serde_json::from_str(&rest).unwrap_or(Value::Object(Default::default()));
        } else if let Some(rest) = field_value(line, &upper, "STRATEGY:") {
            strategy = rest;
        }
    }

    Classification {
        category,
        confidence,
        clusters,
        filters,
        strategy,
        raw: raw.to_string(),
    }
}

fn field_value(line: &str, upper: &str, prefix: &str) -> Option<String> {
    if upper.starts_with(prefix) {
        Some(line[prefix.len()..].trim().to_string())
    } else {
        None
    }
}
