//! Knowledge-base overview: the cached taxonomy the classifier and the
//! progress advisor reason over.
//!
//! Building the overview is an external collaborator's job; the gateway
//! probes `/browse?include_facets` once at startup and parses whatever
//! comes back with [`overview_from_browse`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbCluster {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbCategory {
    pub name: String,
    pub document_count: u64,
    #[serde(default)]
    pub clusters: Vec<KbCluster>,
    #[serde(default)]
    pub sample_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KbOverview {
    pub total_documents: u64,
    pub categories: BTreeMap<String, KbCategory>,
}

impl KbOverview {
    /// Whether a cluster label actually exists anywhere in the taxonomy
    /// (used to drop hallucinated cluster names from classification).
    pub fn has_cluster(&self, label: &str) -> bool {
        self.categories
            .values()
            .any(|c| c.clusters.iter().any(|cl| cl.value == label))
    }

    /// Category codes that have been touched by search filters.
    pub fn category_codes(&self) -> Vec<&str> {
        self.categories.keys().map(|s| s.as_str()).collect()
    }
}

/// Parse a `/browse` response with facets into an overview.
///
/// Expected facet shape: `facets.parent_code` is a list of
/// `{value, count, label?, clusters?, samples?}` buckets; anything missing
/// degrades to an empty field rather than failing.
pub fn overview_from_browse(body: &Value) -> Option<KbOverview> {
    let total_documents = body["total"].as_u64().unwrap_or(0);
    let buckets = body["facets"]["parent_code"].as_array()?;

    let mut categories = BTreeMap::new();
    for bucket in buckets {
        let code = bucket["value"].as_str()?.to_string();
        let clusters = bucket["clusters"]
            .as_array()
            .map(|cs| {
                cs.iter()
                    .filter_map(|c| {
                        Some(KbCluster {
                            value: c["value"].as_str()?.to_string(),
                            count: c["count"].as_u64().unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let sample_questions = bucket["samples"]
            .as_array()
            .map(|ss| {
                ss.iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        categories.insert(
            code.clone(),
            KbCategory {
                name: bucket["label"].as_str().unwrap_or(&code).to_string(),
                document_count: bucket["count"].as_u64().unwrap_or(0),
                clusters,
                sample_questions,
            },
        );
    }

    Some(KbOverview {
        total_documents,
        categories,
    })
}

/// A small two-category overview used across the tool tests.
#[cfg(test)]
pub(crate) fn sample_overview() -> KbOverview {
    use serde_json::json;
    let body = json!({
        "total": 18000,
        "facets": {
            "parent_code": [
                {
                    "value": "PT",
                    "label": "Purity & Taharah",
                    "count": 4200,
                    "clusters": [
                        {"value": "Ghusl", "count": 900},
                        {"value": "Wudu Essentials", "count": 700}
                    ],
                    "samples": ["How do I perform ghusl janabah?"]
                },
                {
                    "value": "FN",
                    "label": "Finance",
                    "count": 3100,
                    "clusters": [{"value": "Banking Riba Operations", "count": 400}]
                }
            ]
        }
    });
    overview_from_browse(&body).unwrap()
}
