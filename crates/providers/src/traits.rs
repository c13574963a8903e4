use std::sync::Arc;

use braid_domain::error::{Error, Result};
use braid_domain::ChatMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LM adapter implements.
///
/// One method, full-history in, text out. Tool orchestration in Braid is
/// textual (the model writes `repl` fences), so adapters never deal with
/// structured tool calls.
#[async_trait::async_trait]
pub trait LmProvider: Send + Sync {
    /// Send the conversation and wait for the full text response.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// The model identifier this adapter sends upstream.
    fn model(&self) -> &str;

    /// Stable backend name (`anthropic`, `openai`, `claude_cli`).
    fn backend(&self) -> &'static str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Recognized LM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Anthropic,
    OpenAi,
    ClaudeCli,
}

impl Backend {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "anthropic" => Ok(Backend::Anthropic),
            "openai" => Ok(Backend::OpenAi),
            "claude_cli" => Ok(Backend::ClaudeCli),
            other => Err(Error::Config(format!("unknown LM backend: {other}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Anthropic => "anthropic",
            Backend::OpenAi => "openai",
            Backend::ClaudeCli => "claude_cli",
        }
    }
}

/// Everything needed to construct one provider instance.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub backend: Backend,
    pub model: String,
    /// API key for HTTP backends. The CLI backend uses the user's
    /// authenticated session and ignores it.
    pub api_key: String,
    /// Base-URL override for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
}

/// Build a provider from settings.
pub fn create_provider(settings: &ProviderSettings) -> Result<Arc<dyn LmProvider>> {
    match settings.backend {
        Backend::Anthropic => Ok(Arc::new(crate::anthropic::AnthropicProvider::new(
            settings.model.clone(),
            settings.api_key.clone(),
        )?)),
        Backend::OpenAi => Ok(Arc::new(crate::openai::OpenAiProvider::new(
            settings.model.clone(),
            settings.api_key.clone(),
            settings.base_url.clone(),
        )?)),
        Backend::ClaudeCli => Ok(Arc::new(crate::claude_cli::ClaudeCliProvider::new(
            settings.model.clone(),
        ))),
    }
}
