//! Claude Code CLI adapter.
//!
//! Shells out to `claude -p` so the service can ride the operator's
//! authenticated CLI session instead of an API key. Chat history is
//! flattened into a single prompt; the system message travels via
//! `--append-system-prompt`.

use braid_domain::error::{Error, Result};
use braid_domain::{ChatMessage, Role};
use tokio::process::Command;

use crate::traits::LmProvider;

pub struct ClaudeCliProvider {
    model: String,
}

impl ClaudeCliProvider {
    pub fn new(model: String) -> Self {
        Self { model }
    }

    /// Flatten the history into `(prompt_text, system_prompt)`.
    fn flatten(messages: &[ChatMessage]) -> (String, Option<String>) {
        let mut system = None;
        let mut parts = Vec::new();
        for msg in messages {
            match msg.role {
                Role::System => system = Some(msg.content.clone()),
                Role::User => parts.push(format!("[user]: {}", msg.content)),
                Role::Assistant => parts.push(format!("[assistant]: {}", msg.content)),
            }
        }
        (parts.join("\n\n"), system)
    }
}

#[async_trait::async_trait]
impl LmProvider for ClaudeCliProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let (prompt_text, system) = Self::flatten(messages);

        let mut cmd = Command::new("claude");
        cmd.arg("-p")
            .arg(&prompt_text)
            .arg("--output-format")
            .arg("text")
            .arg("--tools")
            .arg("");
        if !self.model.is_empty() {
            cmd.arg("--model").arg(&self.model);
        }
        if let Some(system) = system {
            cmd.arg("--append-system-prompt").arg(system);
        }
        cmd.kill_on_drop(true);

        let output = cmd.output().await.map_err(|e| Error::Provider {
            provider: "claude_cli".into(),
            message: format!("failed to spawn claude: {e}"),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Provider {
                provider: "claude_cli".into(),
                message: format!("exit {}: {}", output.status, stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> &'static str {
        "claude_cli"
    }
}
