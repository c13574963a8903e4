//! Progress advisor: a pure read over the evidence store, the quality
//! gate, and the tool-call list, plus a taxonomy-aware strategy
//! suggestion when an overview is cached.

use std::collections::BTreeSet;

use braid_domain::error::Result;
use braid_domain::{EventKind, RatingLabel};
use serde_json::{json, Value};

use crate::context::SearchContext;
use crate::tracker::track;

/// Below this unique-query ratio (with at least 3 searches) the session
/// counts as repeating itself.
const DIVERSITY_FLOOR: f64 = 0.5;

/// Assess progress: signals, confidence, phase, guidance, audit trail.
///
/// Emits a `progress` event, prints the summary into the sandbox stdout,
/// and returns the structured report.
pub fn check_progress(ctx: &SearchContext) -> Result<Value> {
    track(ctx, "check_progress", json!({}), |tc| {
        let evidence = &ctx.evidence;
        let counts = evidence.rating_counts();
        let relevant = *counts.get(&RatingLabel::Relevant).unwrap_or(&0);
        let partial = *counts.get(&RatingLabel::Partial).unwrap_or(&0);

        let searches_run = evidence.query_count();
        let unique_sources = evidence.count();
        let top_score = evidence.top_score();

        let log = evidence.search_log();
        let queries: Vec<&str> = log
            .iter()
            .filter(|e| e.kind.is_query())
            .map(|e| e.query.as_str())
            .collect();
        let unique_queries: BTreeSet<&str> = queries.iter().copied().collect();
        let diversity = if queries.is_empty() {
            0.0
        } else {
            unique_queries.len() as f64 / queries.len() as f64
        };

        let categories_explored: BTreeSet<String> = log
            .iter()
            .filter_map(|e| e.filters.as_ref())
            .filter_map(|f| f["parent_code"].as_str().map(String::from))
            .collect();

        let confidence = ctx.quality.confidence(evidence);
        let gate_phase = ctx.quality.phase(evidence);

        // Low query diversity is a stall variant the gate cannot see.
        let repeating = gate_phase == braid_engine::Phase::Continue
            && queries.len() >= 3
            && diversity < DIVERSITY_FLOOR;

        let phase = if repeating {
            "repeating".to_string()
        } else {
            gate_phase.as_str().to_string()
        };

        let mut guidance = ctx.quality.guidance(evidence);
        if matches!(
            phase.as_str(),
            "continue" | "stalled" | "repeating"
        ) {
            if let Some(strategy) = suggest_strategy(ctx, &categories_explored) {
                guidance = format!("{guidance} {strategy}");
            }
        }
        if repeating {
            guidance = format!("Low query diversity. {guidance}");
        }

        // ── Audit trail (what the LM sees) ─────────────────────────
        ctx.print(&format!("[check_progress] {phase} — {guidance}"));
        ctx.print(&format!(
            "  confidence={confidence}% | searches={searches_run} | sources={unique_sources} \
             | relevant={relevant} | partial={partial} | top_score={top_score:.2}"
        ));
        ctx.print(&format!("  Searches tried:\n{}", format_audit_trail(ctx)));

        let report = json!({
            "phase": phase,
            "confidence": confidence,
            "guidance": guidance,
            "relevant": relevant,
            "partial": partial,
            "top_score": (top_score * 1000.0).round() / 1000.0,
            "searches_run": searches_run,
            "unique_sources": unique_sources,
            "query_diversity": (diversity * 100.0).round() / 100.0,
            "categories_explored": categories_explored,
        });

        ctx.bus.emit(EventKind::Progress, report.clone());
        tc.set_summary(json!({
            "phase": phase,
            "confidence": confidence,
            "relevant": relevant,
            "searches": searches_run,
            "guidance": report["guidance"],
        }));
        Ok(report)
    })
}

/// Name the biggest unexplored category (or an untried cluster) with a
/// copy-paste-ready `research(...)` call. `None` without an overview.
fn suggest_strategy(ctx: &SearchContext, explored: &BTreeSet<String>) -> Option<String> {
    let overview = ctx.kb_overview.as_ref()?;

    let unexplored = overview
        .categories
        .iter()
        .filter(|(code, cat)| !explored.contains(*code) && cat.document_count > 50)
        .max_by_key(|(_, cat)| cat.document_count);

    if let Some((code, cat)) = unexplored {
        let mut suggestion = format!("Unexplored: {} ({} docs).", cat.name, cat.document_count);
        if let Some(cluster) = cat.clusters.first() {
            suggestion.push_str(&format!(
                " Try: research(query, #{{\"filters\": #{{\"parent_code\": \"{code}\", \
                 \"cluster_label\": \"{}\"}}}})",
                cluster.value
            ));
        }
        return Some(suggestion);
    }

    // All categories touched — look for an untried cluster.
    let used_clusters: BTreeSet<String> = ctx
        .evidence
        .search_log()
        .iter()
        .filter_map(|e| e.filters.as_ref())
        .filter_map(|f| f["cluster_label"].as_str().map(String::from))
        .collect();

    for (code, cat) in &overview.categories {
        for cluster in cat.clusters.iter().take(5) {
            if cluster.count > 20 && !used_clusters.contains(&cluster.value) {
                return Some(format!(
                    "Try cluster \"{}\" in {} ({} docs): research(query, \
                     #{{\"filters\": #{{\"parent_code\": \"{code}\", \"cluster_label\": \
                     \"{}\"}}}})",
                    cluster.value, cat.name, cluster.count, cluster.value
                ));
            }
        }
    }

    Some("All major categories and clusters explored. Draft with current evidence.".into())
}

fn format_audit_trail(ctx: &SearchContext) -> String {
    let log = ctx.evidence.search_log();
    let searches: Vec<_> = log.iter().filter(|e| e.kind.is_query()).collect();
    if searches.is_empty() {
        return "  No searches run yet.".into();
    }

    let mut lines = Vec::new();
    for (i, entry) in searches.iter().enumerate() {
        let filters = entry
            .filters
            .as_ref()
            .and_then(|f| f.as_object())
            .map(|obj| {
                let parts: Vec<String> =
                    obj.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!(" [{}]", parts.join(", "))
            })
            .unwrap_or_default();
        lines.push(format!(
            "  {}. \"{}\"{filters} → {} results",
            i + 1,
            entry.query,
            entry.num_results
        ));
    }
    let unique: BTreeSet<&str> = searches.iter().map(|e| e.query.as_str()).collect();
    lines.push(format!(
        "  Diversity: {}/{} unique queries",
        unique.len(),
        searches.len()
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{bare_context, raw_context, FakeCascade, FakeLm};
    use braid_domain::{Hit, SearchKind, SearchLogEntry};
    use std::sync::Arc;

    fn log_query(ctx: &SearchContext, query: &str, parent_code: Option<&str>) {
        ctx.evidence.log_search(SearchLogEntry {
            kind: SearchKind::Search,
            query: query.into(),
            filters: parent_code.map(|c| json!({"parent_code": c})),
            num_results: 3,
        });
    }

    fn register(ctx: &SearchContext, id: &str, score: f64, rating: RatingLabel) {
        ctx.evidence.register_hit(Hit {
            id: id.into(),
            score,
            question: "q".into(),
            answer: "a".into(),
            metadata: Default::default(),
        });
        ctx.evidence.set_rating(id, rating, 5);
    }

    #[test]
    fn reports_signals_and_emits_progress_event() {
        let ctx = bare_context();
        log_query(&ctx, "first query", Some("PT"));
        log_query(&ctx, "second query", None);
        register(&ctx, "1", 0.9, RatingLabel::Relevant);
        register(&ctx, "2", 0.4, RatingLabel::Partial);

        let report = check_progress(&ctx).unwrap();
        assert_eq!(report["searches_run"], 2);
        assert_eq!(report["unique_sources"], 2);
        assert_eq!(report["relevant"], 1);
        assert_eq!(report["partial"], 1);
        assert_eq!(report["top_score"], 0.9);
        assert_eq!(report["query_diversity"], 1.0);
        assert_eq!(report["categories_explored"][0], "PT");

        let events = ctx.bus.bus().replay();
        assert!(events.iter().any(|e| e.kind == EventKind::Progress));
        let stdout = ctx.output.take();
        assert!(stdout.contains("[check_progress]"));
        assert!(stdout.contains("Searches tried"));
    }

    #[test]
    fn ready_phase_when_evidence_is_strong() {
        let ctx = bare_context();
        log_query(&ctx, "q1", None);
        for id in ["1", "2", "3"] {
            register(&ctx, id, 0.9, RatingLabel::Relevant);
        }
        let report = check_progress(&ctx).unwrap();
        assert_eq!(report["phase"], "ready");
        assert!(report["confidence"].as_u64().unwrap() >= 60);
    }

    #[test]
    fn repeating_phase_on_low_diversity() {
        let ctx = bare_context();
        for _ in 0..4 {
            log_query(&ctx, "same query", None);
        }
        let report = check_progress(&ctx).unwrap();
        assert_eq!(report["phase"], "repeating");
        assert!(report["guidance"]
            .as_str()
            .unwrap()
            .contains("Low query diversity"));
    }

    #[test]
    fn strategy_names_unexplored_category_with_overview() {
        let mut inner = raw_context(Arc::new(FakeCascade::default()), Arc::new(FakeLm::default()));
        inner.kb_overview = Some(crate::kb::sample_overview());
        let ctx = Arc::new(inner);

        log_query(&ctx, "q1", Some("FN"));
        let report = check_progress(&ctx).unwrap();
        // PT is the biggest unexplored category; suggestion is pasteable.
        let guidance = report["guidance"].as_str().unwrap();
        assert!(guidance.contains("Purity & Taharah"));
        assert!(guidance.contains("research(query"));
    }

    #[test]
    fn strategy_falls_back_to_untried_clusters() {
        let mut inner = raw_context(Arc::new(FakeCascade::default()), Arc::new(FakeLm::default()));
        inner.kb_overview = Some(crate::kb::sample_overview());
        let ctx = Arc::new(inner);

        for code in ["PT", "FN"] {
            log_query(&ctx, &format!("query {code}"), Some(code));
        }
        let report = check_progress(&ctx).unwrap();
        let guidance = report["guidance"].as_str().unwrap();
        assert!(guidance.contains("Try cluster"));
    }
}
