//! OpenAI-compatible chat-completions adapter.

use braid_domain::error::{Error, Result};
use braid_domain::{ChatMessage, Role};
use serde_json::Value;

use crate::traits::LmProvider;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(model: String, api_key: String, base_url: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            model,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client,
        })
    }

    fn build_body(&self, messages: &[ChatMessage]) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": msg.content })
            })
            .collect();

        serde_json::json!({
            "model": self.model,
            "messages": api_messages,
        })
    }
}

#[async_trait::async_trait]
impl LmProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = self.build_body(messages);

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
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
                provider: "openai".into(),
                message: format!("{status}: {message}"),
            });
        }

        Ok(payload["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn backend(&self) -> &'static str {
        "openai"
    }
}
