//! Records produced by the iteration driver and the sandbox.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record of one LM call made from inside the sandbox (via the injected
/// `llm_query` / `llm_query_batched` callables).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmCallRecord {
    pub prompt: String,
    pub response: String,
    pub execution_time: f64,
}

/// Result of executing one code fragment in the sandbox.
///
/// Uncaught script errors land in `stderr` as `Class: message`; they never
/// propagate out of `execute`. `locals` is a serializable snapshot of the
/// sandbox namespace with leading-underscore names filtered out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplResult {
    pub stdout: String,
    pub stderr: String,
    pub locals: Value,
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested_calls: Vec<LmCallRecord>,
}

impl ReplResult {
    /// A synthetic result for a fragment that was never executed (cascade
    /// skip). `stderr` begins with `[Skipped:` by contract.
    pub fn skipped(reason: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("[Skipped: {reason}]"),
            locals: Value::Object(Default::default()),
            execution_time: 0.0,
            nested_calls: Vec::new(),
        }
    }

    /// Whether the fragment failed to parse (as opposed to failing at
    /// runtime). The sandbox prefixes parse failures with `SyntaxError`.
    pub fn is_syntax_error(&self) -> bool {
        self.stderr.starts_with("SyntaxError")
    }

    /// Whether the fragment produced any error at all.
    pub fn is_error(&self) -> bool {
        !self.stderr.is_empty()
    }
}

/// One fenced fragment from an LM response, paired with its result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeBlock {
    pub code: String,
    pub result: ReplResult,
}

/// One full turn of the reasoning loop: the prompt sent, the raw response,
/// the executed fragments, and the sentinel answer when the response
/// terminated the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub prompt: String,
    pub response: String,
    pub code_blocks: Vec<CodeBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    pub iteration_time: f64,
}

/// Run-level metadata, emitted once as the first event of every search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub root_model: String,
    pub backend: String,
    pub max_iterations: usize,
    pub max_depth: usize,
    pub environment: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_result_has_contract_prefix() {
        let r = ReplResult::skipped("cascading errors");
        assert!(r.stderr.starts_with("[Skipped:"));
        assert!(r.stderr.contains("cascading"));
        assert!(r.is_error());
        assert!(!r.is_syntax_error());
    }

    #[test]
    fn syntax_error_detection() {
        let r = ReplResult {
            stdout: String::new(),
            stderr: "SyntaxError: unexpected end of input".into(),
            locals: Value::Object(Default::default()),
            execution_time: 0.0,
            nested_calls: Vec::new(),
        };
        assert!(r.is_syntax_error());
    }

    #[test]
    fn final_answer_omitted_when_none() {
        let record = IterationRecord {
            prompt: "p".into(),
            response: "r".into(),
            code_blocks: vec![],
            final_answer: None,
            iteration_time: 0.1,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("final_answer").is_none());
    }
}
