//! Query classification produced once at session bootstrap.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How confident the classifier sub-call was in its category pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassConfidence {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MEDIUM")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
}

/// Result of the zero-iteration classification sub-call.
///
/// Optional everywhere it is consumed: classification failing (or no
/// taxonomy overview being available) leaves the session running without
/// one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub confidence: ClassConfidence,
    /// Comma-separated cluster labels, filtered against the real overview.
    pub clusters: String,
    pub filters: Value,
    pub strategy: String,
    /// The unparsed LM output, kept for the audit log.
    pub raw: String,
}
