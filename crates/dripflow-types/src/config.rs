//! Engine configuration types for dripflow.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls batch
//! sizing, generation timeouts, and the LLM endpoint used to write messages.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the flow engine.
///
/// Loaded from `~/.dripflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum subjects advanced per flow per cycle (flood control).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    /// Upper bound on a single message generation call, in seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Template used when a message step carries no `template_slug`.
    #[serde(default = "default_template")]
    pub default_template: String,

    /// LLM endpoint used by the message generator.
    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_max_batch_size() -> u32 {
    100
}

fn default_generation_timeout_secs() -> u64 {
    30
}

fn default_template() -> String {
    "reactivation".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            generation_timeout_secs: default_generation_timeout_secs(),
            default_template: default_template(),
            llm: LlmConfig::default(),
        }
    }
}

/// OpenAI-compatible endpoint settings for message generation.
///
/// The API key itself never lives in the config file; only the name of the
/// environment variable holding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable that holds the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Language the generated messages must be written in.
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_language() -> String {
    "pt-BR".to_string()
}

fn default_max_tokens() -> u32 {
    400
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            language: default_language(),
            max_tokens: default_max_tokens(),
        }
    }
}
