//! Configuration for the load tester.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct StressConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// A user API key issued by the gatekeeper (the master key is refused).
    pub api_key: String,
    /// Models benchmarked one after the other.
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Requests in flight at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_requests_per_model")]
    pub requests_per_model: usize,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Pause between two models.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Request `i` waits `i * stagger_ms` after getting its slot.
    #[serde(default = "default_stagger")]
    pub stagger_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_models() -> Vec<String> {
    vec!["llama3.2:3b".to_string(), "llama3:8b".to_string()]
}
fn default_concurrency() -> usize {
    8
}
fn default_requests_per_model() -> usize {
    30
}
fn default_prompt() -> String {
    "Briefly explain the concept of threads in processors.".to_string()
}
fn default_request_timeout() -> u64 {
    120
}
fn default_cooldown() -> u64 {
    5
}
fn default_stagger() -> u64 {
    50
}

impl StressConfig {
    /// Load from `stress.toml` (optional) and `STRESS__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("stress").required(false))
            .add_source(
                Environment::with_prefix("STRESS")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("models")
                    .try_parsing(true),
            )
            .build()?;

        let config: StressConfig = config.try_deserialize()?;
        config.validate()
    }

    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Message("api_key must be set (STRESS__API_KEY)".to_string()));
        }
        if self.models.is_empty() {
            return Err(ConfigError::Message("at least one model is required".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::Message("concurrency must be at least 1".to_string()));
        }
        self.base_url = self.base_url.trim_end_matches('/').to_string();
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

#[cfg(test)]
pub(crate) fn test_config(base_url: &str) -> StressConfig {
    StressConfig {
        base_url: base_url.to_string(),
        api_key: "gk-test".to_string(),
        models: vec!["llama3.2:3b".to_string()],
        concurrency: 2,
        requests_per_model: 3,
        prompt: default_prompt(),
        request_timeout_secs: 5,
        cooldown_secs: 0,
        stagger_ms: 0,
    }
}
