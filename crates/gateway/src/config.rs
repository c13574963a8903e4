//! Environment-driven service configuration, read once at startup.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the downstream Cascade retrieval API.
    pub cascade_api_url: String,
    /// Injected into retrieval HTTP headers.
    pub cascade_api_key: String,
    pub anthropic_api_key: String,
    pub openai_api_key: String,

    /// LM backend selector: `anthropic`, `openai`, or `claude_cli`.
    pub backend: String,
    pub model: String,
    /// Model for delegated and tool sub-calls; empty = same as `model`.
    pub sub_model: String,
    pub classify_model: String,

    /// Root driver iteration budget.
    pub max_iterations: usize,
    /// Maximum sandbox nesting; 0 disables code execution entirely.
    pub max_depth: usize,
    /// Child driver budget.
    pub sub_iterations: usize,
    /// Hard cap on `rlm_query` nesting; 0 removes the tool.
    pub max_delegation_depth: usize,

    /// Idle seconds before a session is reaped.
    pub session_timeout_secs: u64,
    /// When set, requests must carry it in the `x-api-key` header.
    pub search_api_key: String,

    pub port: u16,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            cascade_api_url: env_or("CASCADE_API_URL", "http://localhost:8092"),
            cascade_api_key: env_or("CASCADE_API_KEY", ""),
            anthropic_api_key: env_or("ANTHROPIC_API_KEY", ""),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            backend: env_or("RLM_BACKEND", "anthropic"),
            model: env_or("RLM_MODEL", "claude-sonnet-4-20250514"),
            sub_model: env_or("RLM_SUB_MODEL", ""),
            classify_model: env_or("RLM_CLASSIFY_MODEL", ""),
            max_iterations: env_parse("RLM_MAX_ITERATIONS", 15),
            max_depth: env_parse("RLM_MAX_DEPTH", 1),
            sub_iterations: env_parse("RLM_SUB_ITERATIONS", 3),
            max_delegation_depth: env_parse("RLM_MAX_DELEGATION_DEPTH", 1),
            session_timeout_secs: env_parse("SESSION_TIMEOUT", 1800),
            search_api_key: env_or("SEARCH_API_KEY", ""),
            port: env_parse("BRAID_PORT", 8092),
            log_dir: PathBuf::from(env_or("BRAID_LOG_DIR", "./braid_logs")),
        }
    }

    /// Effective settings for one search: config defaults overlaid with
    /// the request's per-search overrides.
    pub fn resolve(&self, overrides: &SearchSettings) -> ResolvedSettings {
        let model = overrides.model.clone().unwrap_or_else(|| self.model.clone());
        let sub_model = overrides
            .sub_model
            .clone()
            .unwrap_or_else(|| self.sub_model.clone());
        ResolvedSettings {
            backend: overrides
                .backend
                .clone()
                .unwrap_or_else(|| self.backend.clone()),
            sub_model: if sub_model.is_empty() || sub_model == "same" {
                model.clone()
            } else {
                sub_model
            },
            model,
            classify_model: self.classify_model.clone(),
            max_iterations: overrides.max_iterations.unwrap_or(self.max_iterations),
            max_depth: overrides.max_depth.unwrap_or(self.max_depth),
            sub_iterations: overrides.sub_iterations.unwrap_or(self.sub_iterations),
            max_delegation_depth: overrides
                .max_delegation_depth
                .unwrap_or(self.max_delegation_depth),
        }
    }
}

/// Per-request overrides accepted in the `settings` body field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub sub_model: Option<String>,
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub sub_iterations: Option<usize>,
    #[serde(default)]
    pub max_delegation_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub backend: String,
    pub model: String,
    pub sub_model: String,
    pub classify_model: String,
    pub max_iterations: usize,
    pub max_depth: usize,
    pub sub_iterations: usize,
    pub max_delegation_depth: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            cascade_api_url: "http://localhost:8092".into(),
            cascade_api_key: String::new(),
            anthropic_api_key: String::new(),
            openai_api_key: String::new(),
            backend: "anthropic".into(),
            model: "model-a".into(),
            sub_model: String::new(),
            classify_model: String::new(),
            max_iterations: 15,
            max_depth: 1,
            sub_iterations: 3,
            max_delegation_depth: 1,
            session_timeout_secs: 1800,
            search_api_key: String::new(),
            port: 8092,
            log_dir: PathBuf::from("./braid_logs"),
        }
    }

    #[test]
    fn overrides_take_precedence() {
        let config = base_config();
        let resolved = config.resolve(&SearchSettings {
            model: Some("model-b".into()),
            max_iterations: Some(5),
            ..Default::default()
        });
        assert_eq!(resolved.model, "model-b");
        assert_eq!(resolved.max_iterations, 5);
        assert_eq!(resolved.backend, "anthropic");
    }

    #[test]
    fn empty_or_same_sub_model_falls_back_to_root_model() {
        let config = base_config();
        let resolved = config.resolve(&SearchSettings::default());
        assert_eq!(resolved.sub_model, "model-a");

        let resolved = config.resolve(&SearchSettings {
            sub_model: Some("same".into()),
            ..Default::default()
        });
        assert_eq!(resolved.sub_model, "model-a");

        let resolved = config.resolve(&SearchSettings {
            sub_model: Some("model-small".into()),
            ..Default::default()
        });
        assert_eq!(resolved.sub_model, "model-small");
    }
}
