//! Anthropic Messages API adapter.
//!
//! System messages go in the top-level `system` field; user/assistant turns
//! map directly. Responses are concatenated text blocks.

use braid_domain::error::{Error, Result};
use braid_domain::{ChatMessage, Role};
use serde_json::Value;

use crate::traits::LmProvider;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const MAX_TOKENS: u32 = 8192;

pub struct AnthropicProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(model: String, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            model,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        })
    }

    fn build_body(&self, messages: &[ChatMessage]) -> Value {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User => api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content,
                })),
                Role::Assistant => api_messages.push(serde_json::json!({
                    "role": "assistant",
                    "content": msg.content,
                })),
            }
        }

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": api_messages,
            "max_tokens": MAX_TOKENS,
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        body
    }
}

#[async_trait::async_trait]
impl LmProvider for AnthropicProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.build_body(messages);

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("request failed")
                .to_string();
            return Err(Error::Provider {
                provider: "anthropic".into(),
                message: format!("{status}: {message}"),
            });
        }

        let text = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_lift_into_system_field() {
        let provider =
            AnthropicProvider::new("claude-test".into(), "key".into()).unwrap();
        let body = provider.build_body(&[
            ChatMessage::system("you are a researcher"),
            ChatMessage::user("question"),
            ChatMessage::assistant("working on it"),
        ]);
        assert_eq!(body["system"], "you are a researcher");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["model"], "claude-test");
    }
}
