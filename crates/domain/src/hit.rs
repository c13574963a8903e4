//! Evidence shapes: normalized retrieval hits, relevance ratings, and the
//! per-session search log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A normalized retrieval hit.
///
/// Identity is the string `id`; upstream integer ids are coerced at
/// normalization time. `metadata` carries the taxonomy fields
/// (`parent_code`, `cluster_label`, `primary_topic`, `subtopics`,
/// `parent_category`) when the upstream record has them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Relevance label assigned by `evaluate_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RatingLabel {
    #[serde(rename = "RELEVANT")]
    Relevant,
    #[serde(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "OFF-TOPIC", alias = "OFF_TOPIC")]
    OffTopic,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl RatingLabel {
    /// Sort tier for `top_rated`: relevant first, unknown last.
    pub fn tier(self) -> u8 {
        match self {
            RatingLabel::Relevant => 0,
            RatingLabel::Partial => 1,
            RatingLabel::OffTopic => 2,
            RatingLabel::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RatingLabel::Relevant => "RELEVANT",
            RatingLabel::Partial => "PARTIAL",
            RatingLabel::OffTopic => "OFF-TOPIC",
            RatingLabel::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for RatingLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rating per hit per session, with confidence 1–5.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rating {
    pub rating: RatingLabel,
    pub confidence: u8,
}

/// What kind of retrieval call produced a search-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    Search,
    SearchMulti,
    Browse,
}

impl SearchKind {
    /// Browse calls are exploration; only real searches count toward
    /// breadth and stall detection.
    pub fn is_query(self) -> bool {
        matches!(self, SearchKind::Search | SearchKind::SearchMulti)
    }
}

/// Append-only record of one retrieval call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchLogEntry {
    #[serde(rename = "type")]
    pub kind: SearchKind,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    pub num_results: usize,
}
