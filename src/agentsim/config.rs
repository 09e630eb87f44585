//! Configuration for agentsim.
//!
//! Provides the [`AgentSimConfig`] struct holding the judge settings, provider credentials
//! and the address the HTTP boundary binds to. Users construct it manually or load it from
//! the environment; no config-file parsing dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use agentsim::AgentSimConfig;
//!
//! let config = AgentSimConfig {
//!     anthropic_api_key: Some("sk-ant-...".to_string()),
//!     port: 9000,
//!     ..AgentSimConfig::default()
//! };
//! assert_eq!(config.judge_max_tokens, 2048);
//! assert!(config.has_anthropic());
//! assert!(!config.has_openai());
//! ```

use std::env;

/// Judge model used when `AGENTSIM_JUDGE_MODEL` is not set.
pub const DEFAULT_JUDGE_MODEL: &str = "claude-sonnet-4-5-20250929";
/// Output cap for the judge's single call.
pub const DEFAULT_JUDGE_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_PORT: u16 = 8000;

/// Process-wide settings shared by the backends, the judge and the server.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSimConfig {
    /// Model identifier the judge calls.
    pub judge_model: String,
    pub judge_max_tokens: u32,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_api_key: Option<String>,
    /// Base URL of an OpenAI-compatible endpoint (without the `/v1/...` path).
    pub openai_base_url: String,
    pub host: String,
    pub port: u16,
}

impl Default for AgentSimConfig {
    fn default() -> Self {
        AgentSimConfig {
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            judge_max_tokens: DEFAULT_JUDGE_MAX_TOKENS,
            anthropic_api_key: None,
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl AgentSimConfig {
    /// Overlay the defaults with `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `OPENAI_BASE_URL`,
    /// `AGENTSIM_JUDGE_MODEL` and `PORT`.
    ///
    /// Empty variables count as unset. An unparseable `PORT` falls back to the default
    /// with a warning.
    pub fn from_env() -> Self {
        let mut config = AgentSimConfig::default();

        config.anthropic_api_key = non_empty_var("ANTHROPIC_API_KEY");
        config.openai_api_key = non_empty_var("OPENAI_API_KEY");

        if let Some(url) = non_empty_var("OPENAI_BASE_URL") {
            config.openai_base_url = url;
        }
        if let Some(model) = non_empty_var("AGENTSIM_JUDGE_MODEL") {
            config.judge_model = model;
        }
        if let Some(port) = non_empty_var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => log::warn!(
                    "AgentSimConfig::from_env: ignoring invalid PORT {:?}, using {}",
                    port,
                    DEFAULT_PORT
                ),
            }
        }

        log::debug!(
            "AgentSimConfig::from_env: anthropic={} openai={} judge_model={}",
            config.has_anthropic(),
            config.has_openai(),
            config.judge_model
        );
        config
    }

    pub fn has_anthropic(&self) -> bool {
        self.anthropic_api_key.is_some()
    }

    pub fn has_openai(&self) -> bool {
        self.openai_api_key.is_some()
    }

    /// `host:port` string for binding a listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentSimConfig::default();
        assert_eq!(config.judge_model, DEFAULT_JUDGE_MODEL);
        assert_eq!(config.judge_max_tokens, 2048);
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert!(!config.has_anthropic());
        assert!(!config.has_openai());
    }
}
