use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use feedback_dedup_core::params::DetectionParams;

use crate::error::DedupError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default)]
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DbConfig {
    /// Connection string, e.g. `sqlite:./data/feedback.sqlite`.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_llm_base_url(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between posts in live mode.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_cooldown_hours")]
    pub cooldown_hours: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_ms: default_delay_ms(),
            cooldown_hours: default_cooldown_hours(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_delay_ms() -> u64 {
    500
}
fn default_cooldown_hours() -> i64 {
    24
}

impl Config {
    /// Defaults everywhere, pointing at the given database.
    pub fn for_database(url: impl Into<String>) -> Self {
        Self {
            db: DbConfig {
                url: Some(url.into()),
            },
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retry: RetryConfig::default(),
            detection: DetectionParams::default(),
            sweep: SweepConfig::default(),
        }
    }

    /// The resolved connection string.
    pub fn database_url(&self) -> Result<&str, DedupError> {
        self.db
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                DedupError::Config(
                    "no database connection string: set db.url or DATABASE_URL".into(),
                )
            })
    }

    /// The model name recorded with embeddings, when embeddings are enabled.
    pub fn embedding_model(&self) -> Option<&str> {
        if self.embedding.is_enabled() {
            self.embedding.model.as_deref()
        } else {
            None
        }
    }
}

/// API key for the chat model: `LLM_API_KEY`, falling back to `OPENAI_API_KEY`.
pub fn llm_api_key() -> Result<String, DedupError> {
    non_empty_env("LLM_API_KEY")
        .or_else(|| non_empty_env("OPENAI_API_KEY"))
        .ok_or_else(|| DedupError::Config("OPENAI_API_KEY environment variable not set".into()))
}

/// API key for the OpenAI embeddings endpoint.
pub fn openai_api_key() -> Result<String, DedupError> {
    non_empty_env("OPENAI_API_KEY")
        .ok_or_else(|| DedupError::Config("OPENAI_API_KEY environment variable not set".into()))
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, non_empty_env("DATABASE_URL"))
}

/// Parse and validate config text. `database_url` overrides `[db].url`.
pub fn parse_config(content: &str, database_url: Option<String>) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if let Some(url) = database_url {
        config.db.url = Some(url);
    }
    config.database_url()?;

    config.detection.validate()?;

    if config.sweep.batch_size == 0 {
        anyhow::bail!("sweep.batch_size must be >= 1");
    }
    if config.sweep.cooldown_hours < 0 {
        anyhow::bail!("sweep.cooldown_hours must be >= 0");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.llm.provider != "openai" {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Only openai-compatible endpoints are supported.",
            config.llm.provider
        );
    }

    Ok(config)
}
