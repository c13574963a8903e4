//! Provider-agnostic chat messages and the synchronous LM contract.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// The LM callable handed to the iteration driver and the tool layer.
///
/// Calls are blocking from the worker's perspective; adapters are free to
/// run the underlying I/O on an async runtime as long as ordering is
/// preserved. `completion_batched` surfaces per-item failures as strings
/// beginning with `Error:` so batched consumers can skip them instead of
/// losing the whole batch.
pub trait LmHandler: Send + Sync {
    /// Full-history completion used by the driver loop.
    fn completion(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Single-prompt completion used by sub-agent tools.
    fn completion_text(&self, prompt: &str) -> Result<String> {
        self.completion(&[ChatMessage::user(prompt)])
    }

    /// One response per prompt, in order. Individual failures come back as
    /// `Error: …` strings rather than failing the batch.
    fn completion_batched(&self, prompts: &[String]) -> Vec<String>;
}
