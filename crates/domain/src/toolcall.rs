//! Flat tool-call tree shared by the tracker and the audit log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tracked tool invocation.
///
/// Records live in an append-only list owned by the session; parents store
/// the list indices of their children, so the tree is reconstructed by
/// position rather than by ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    pub result_summary: Value,
    pub duration_ms: u64,
    pub children: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallRecord {
    pub fn started(tool: &str, args: Value) -> Self {
        Self {
            tool: tool.to_string(),
            args,
            result_summary: Value::Object(Default::default()),
            duration_ms: 0,
            children: Vec::new(),
            error: None,
        }
    }
}
