//! Thin wrappers over the Cascade retrieval API: `search`, `browse`,
//! `search_multi`, and the `lookup` terminology bridge.
//!
//! Every wrapper normalizes returned hits into the canonical shape,
//! registers them in the evidence store (the sandbox's live registry view
//! picks them up immediately), and appends a search-log entry.

use braid_domain::error::Result;
use braid_domain::{Hit, SearchKind, SearchLogEntry};
use serde_json::{json, Map, Value};

use crate::cascade::{BrowseRequest, MultiSearchRequest, SearchRequest, DEFAULT_COLLECTION,
    MULTI_COLLECTIONS};
use crate::context::SearchContext;
use crate::tracker::track;
use crate::MAX_QUERY_LEN;

/// Taxonomy fields lifted into `Hit.metadata`.
const META_FIELDS: &[&str] = &[
    "parent_code",
    "parent_category",
    "cluster_label",
    "primary_topic",
    "subtopics",
];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize one upstream hit and register it in the evidence store.
///
/// Integer ids are coerced to strings; passage-style records that carry
/// `text` instead of question/answer keep their content in `answer`.
pub fn normalize_hit(raw: &Value, ctx: &SearchContext) -> Hit {
    let id = match &raw["id"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    let score = raw["score"]
        .as_f64()
        .or_else(|| raw["relevance_score"].as_f64())
        .unwrap_or(0.0);
    let question = raw["question"].as_str().unwrap_or_default().to_string();
    let mut answer = raw["answer"].as_str().unwrap_or_default().to_string();
    if question.is_empty() && answer.is_empty() {
        if let Some(text) = raw["text"].as_str() {
            answer = text.to_string();
        }
    }

    let mut metadata = std::collections::BTreeMap::new();
    for field in META_FIELDS {
        if let Some(v) = raw.get(*field) {
            if !v.is_null() {
                metadata.insert((*field).to_string(), v.clone());
            }
        }
    }

    let hit = Hit {
        id,
        score,
        question,
        answer,
        metadata,
    };
    ctx.evidence.register_hit(hit.clone());
    hit
}

fn normalize_all(ctx: &SearchContext, hits: Option<&Vec<Value>>) -> Vec<Hit> {
    hits.map(|hs| hs.iter().map(|h| normalize_hit(h, ctx)).collect())
        .unwrap_or_default()
}

/// Compact hit list for event payloads: at most 10 hits, question and
/// answer truncated so tool events stay small on the SSE stream.
pub fn truncate_hits(hits: &[Hit]) -> Value {
    let out: Vec<Value> = hits
        .iter()
        .take(10)
        .map(|h| {
            let mut entry = Map::new();
            entry.insert("id".into(), json!(h.id));
            entry.insert("score".into(), json!((h.score * 1000.0).round() / 1000.0));
            entry.insert("question".into(), json!(clip(&h.question, 100)));
            entry.insert("answer".into(), json!(clip(&h.answer, 200)));
            if let Some(topic) = h.metadata.get("primary_topic") {
                entry.insert("topic".into(), topic.clone());
            }
            Value::Object(entry)
        })
        .collect();
    Value::Array(out)
}

pub(crate) fn clip(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Enforce the query length cap, warning into the sandbox stdout.
fn cap_query(ctx: &SearchContext, tool: &str, query: &str) -> String {
    if query.len() > MAX_QUERY_LEN {
        ctx.print(&format!(
            "[{tool}] WARNING: query too long ({} chars), truncating to {MAX_QUERY_LEN}",
            query.len()
        ));
        clip(query, MAX_QUERY_LEN)
    } else {
        query.to_string()
    }
}

fn hits_to_value(hits: &[Hit]) -> Value {
    serde_json::to_value(hits).unwrap_or_else(|_| json!([]))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn search(
    ctx: &SearchContext,
    query: &str,
    filters: Option<Value>,
    top_k: usize,
) -> Result<Value> {
    let query = cap_query(ctx, "search", query);
    track(
        ctx,
        "search",
        json!({ "query": query, "top_k": top_k, "filters": filters }),
        |tc| {
            let req = SearchRequest {
                query: query.clone(),
                collection: DEFAULT_COLLECTION.to_string(),
                top_k,
                filters: filters.clone(),
            };
            let body = ctx.api.search(&req)?;
            let results = normalize_all(ctx, body["hits"].as_array());
            let total = body["total"].as_u64().unwrap_or(results.len() as u64);

            ctx.print(&format!(
                "[search] query={query:?} top_k={top_k} results={}",
                results.len()
            ));
            ctx.evidence.log_search(SearchLogEntry {
                kind: SearchKind::Search,
                query: query.clone(),
                filters: filters.clone(),
                num_results: results.len(),
            });
            tc.set_summary(json!({
                "num_results": results.len(),
                "total": total,
                "query": query,
                "hits": truncate_hits(&results),
            }));
            Ok(json!({ "results": hits_to_value(&results), "total": total }))
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// search_multi
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cross-collection search with server-side rerank. Replaces `search`
/// inside `research` when the session runs in multi mode.
pub fn search_multi(
    ctx: &SearchContext,
    query: &str,
    filters: Option<Value>,
    top_k: usize,
) -> Result<Value> {
    let query = cap_query(ctx, "search_multi", query);
    track(
        ctx,
        "search_multi",
        json!({ "query": query, "top_k": top_k }),
        |tc| {
            let collections: Vec<String> =
                MULTI_COLLECTIONS.iter().map(|s| s.to_string()).collect();
            let req = MultiSearchRequest {
                query: query.clone(),
                collections: collections.clone(),
                top_k_per_collection: 50,
                top_k,
                filters: filters.clone(),
            };
            let body = ctx.api.search_multi(&req)?;
            let results = normalize_all(ctx, body["hits"].as_array());
            let total = body["total"].as_u64().unwrap_or(results.len() as u64);

            ctx.print(&format!(
                "[search_multi] query={query:?} collections={collections:?} results={}",
                results.len()
            ));
            ctx.evidence.log_search(SearchLogEntry {
                kind: SearchKind::SearchMulti,
                query: query.clone(),
                filters: filters.clone(),
                num_results: results.len(),
            });
            tc.set_summary(json!({
                "num_results": results.len(),
                "total": total,
                "query": query,
                "collections": collections,
                "hits": truncate_hits(&results),
            }));
            Ok(json!({
                "results": hits_to_value(&results),
                "total": total,
                "collections_searched": collections,
            }))
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// browse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Options for `browse` (the sandbox passes a single options map).
#[derive(Debug, Clone, Default)]
pub struct BrowseOptions {
    pub filters: Option<Value>,
    pub offset: usize,
    pub limit: usize,
    pub sort_by: Option<String>,
    pub group_by: Option<String>,
    pub group_limit: usize,
}

pub fn browse(ctx: &SearchContext, opts: BrowseOptions) -> Result<Value> {
    track(
        ctx,
        "browse",
        json!({ "filters": opts.filters, "offset": opts.offset, "limit": opts.limit }),
        |tc| {
            let req = BrowseRequest {
                collection: DEFAULT_COLLECTION.to_string(),
                filters: opts.filters.clone(),
                offset: opts.offset,
                limit: if opts.limit == 0 { 20 } else { opts.limit },
                sort_by: opts.sort_by.clone(),
                group_by: opts.group_by.clone(),
                group_limit: opts.group_by.as_ref().map(|_| {
                    if opts.group_limit == 0 { 4 } else { opts.group_limit }
                }),
                include_facets: true,
            };
            let body = ctx.api.browse(&req)?;
            let results = normalize_all(ctx, body["hits"].as_array());
            let total = body["total"].as_u64().unwrap_or(0);

            // Grouped results arrive either as {"clusters": [...]} or as a
            // bare list; groups' hits are normalized the same way.
            let raw_grouped = &body["grouped_results"];
            let group_list: Vec<Value> = raw_grouped["clusters"]
                .as_array()
                .or_else(|| raw_grouped.as_array())
                .cloned()
                .unwrap_or_default();
            let grouped: Vec<Value> = group_list
                .into_iter()
                .map(|mut group| {
                    let hits = normalize_all(ctx, group["hits"].as_array());
                    group["hits"] = hits_to_value(&hits);
                    group
                })
                .collect();

            ctx.print(&format!(
                "[browse] filters={:?} results={} total={total}",
                opts.filters,
                results.len()
            ));
            ctx.evidence.log_search(SearchLogEntry {
                kind: SearchKind::Browse,
                query: String::new(),
                filters: opts.filters.clone(),
                num_results: results.len(),
            });
            tc.set_summary(json!({
                "num_results": results.len(),
                "total": total,
                "hits": truncate_hits(&results),
            }));
            Ok(json!({
                "results": hits_to_value(&results),
                "total": total,
                "has_more": body["has_more"].as_bool().unwrap_or(false),
                "facets": body["facets"].clone(),
                "grouped_results": grouped,
            }))
        },
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Terminology bridge: canonical forms, translations, and related terms
/// for a word or phrase in any supported language.
pub fn lookup(ctx: &SearchContext, query: &str) -> Result<Value> {
    track(ctx, "lookup", json!({ "query": query }), |tc| {
        let body = ctx.api.bridge(query)?;
        let bridges = body["bridges"].as_array().cloned().unwrap_or_default();
        let related = body["related"].as_array().cloned().unwrap_or_default();

        ctx.print(&format!(
            "[lookup] query={query:?} bridges={} related={}",
            bridges.len(),
            related.len()
        ));
        tc.set_summary(json!({
            "num_bridges": bridges.len(),
            "num_related": related.len(),
            "bridges": bridges
                .iter()
                .take(10)
                .map(|b| json!({
                    "term": b["canonical"].as_str().or(b["term"].as_str()).unwrap_or(""),
                    "translation": b["english"].as_str().unwrap_or(""),
                }))
                .collect::<Vec<_>>(),
        }));
        Ok(json!({ "bridges": bridges, "related": related }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::{bare_context, context_with, FakeCascade, FakeLm};
    use std::sync::Arc;

    #[test]
    fn search_normalizes_registers_and_logs() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[("101", 0.9), ("102", 0.7)]);
        let ctx = context_with(api, Arc::new(FakeLm::default()));

        let out = search(&ctx, "ghusl steps", None, 10).unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 2);
        assert_eq!(out["total"], 2);

        // Live registry updated.
        assert_eq!(ctx.evidence.count(), 2);
        assert_eq!(ctx.evidence.get("101").unwrap().score, 0.9);
        // Search log appended.
        let log = ctx.evidence.search_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].num_results, 2);
        // Output mentions the query.
        let stdout = ctx.output.take();
        assert!(stdout.contains("[search]"));
    }

    #[test]
    fn integer_ids_are_coerced_to_strings() {
        let ctx = bare_context();
        let hit = normalize_hit(
            &serde_json::json!({"id": 4711, "score": 0.5, "question": "q", "answer": "a"}),
            &ctx,
        );
        assert_eq!(hit.id, "4711");
        assert!(ctx.evidence.get("4711").is_some());
    }

    #[test]
    fn passage_text_lands_in_answer() {
        let ctx = bare_context();
        let hit = normalize_hit(
            &serde_json::json!({"id": "p1", "relevance_score": 0.4, "text": "passage body"}),
            &ctx,
        );
        assert_eq!(hit.answer, "passage body");
        assert_eq!(hit.score, 0.4);
    }

    #[test]
    fn metadata_keeps_taxonomy_fields_only() {
        let ctx = bare_context();
        let hit = normalize_hit(
            &serde_json::json!({
                "id": "1", "score": 0.5, "question": "q", "answer": "a",
                "parent_code": "PT", "cluster_label": "Ghusl", "internal_field": "x"
            }),
            &ctx,
        );
        assert_eq!(hit.metadata["parent_code"], "PT");
        assert_eq!(hit.metadata["cluster_label"], "Ghusl");
        assert!(!hit.metadata.contains_key("internal_field"));
    }

    #[test]
    fn long_queries_truncate_with_warning() {
        let api = Arc::new(FakeCascade::default());
        api.queue_hits(&[]);
        let ctx = context_with(api.clone(), Arc::new(FakeLm::default()));

        let long = "x".repeat(700);
        search(&ctx, &long, None, 5).unwrap();
        assert!(ctx.output.take().contains("query too long"));
        assert_eq!(api.search_requests.lock()[0].query.len(), MAX_QUERY_LEN);
    }

    #[test]
    fn truncate_hits_caps_count_and_lengths() {
        let hits: Vec<Hit> = (0..15)
            .map(|i| Hit {
                id: i.to_string(),
                score: 0.123456,
                question: "q".repeat(300),
                answer: "a".repeat(500),
                metadata: Default::default(),
            })
            .collect();
        let out = truncate_hits(&hits);
        let arr = out.as_array().unwrap();
        assert_eq!(arr.len(), 10);
        assert_eq!(arr[0]["question"].as_str().unwrap().len(), 100);
        assert_eq!(arr[0]["answer"].as_str().unwrap().len(), 200);
    }

    #[test]
    fn browse_normalizes_grouped_results() {
        let api = Arc::new(FakeCascade::default());
        *api.browse_result.lock() = serde_json::json!({
            "hits": [{"id": "1", "score": 0.3, "question": "q", "answer": "a"}],
            "total": 40,
            "has_more": true,
            "facets": {"parent_code": []},
            "grouped_results": {
                "clusters": [
                    {"value": "Ghusl", "hits": [{"id": "2", "score": 0.6, "question": "gq", "answer": "ga"}]}
                ]
            }
        });
        let ctx = context_with(api, Arc::new(FakeLm::default()));

        let out = browse(
            &ctx,
            BrowseOptions {
                group_by: Some("cluster_label".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(out["has_more"], true);
        assert_eq!(out["grouped_results"][0]["hits"][0]["id"], "2");
        // Grouped hits registered too.
        assert!(ctx.evidence.get("2").is_some());
        // Browse logs with browse kind, not counted as a query.
        assert_eq!(ctx.evidence.query_count(), 0);
        assert_eq!(ctx.evidence.search_log().len(), 1);
    }

    #[test]
    fn lookup_summarizes_bridges() {
        let api = Arc::new(FakeCascade::default());
        *api.bridge_result.lock() = serde_json::json!({
            "bridges": [{"canonical": "ghusl", "english": "ritual bath"}],
            "related": [{"term": "wudu"}]
        });
        let ctx = context_with(api, Arc::new(FakeLm::default()));
        let out = lookup(&ctx, "ghusl").unwrap();
        assert_eq!(out["bridges"][0]["canonical"], "ghusl");
        let calls = ctx.tool_calls();
        assert_eq!(calls[0].result_summary["bridges"][0]["term"], "ghusl");
    }
}
