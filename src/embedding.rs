//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait from the core crate:
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//! - **[`OllamaProvider`]**: calls a local Ollama instance.
//!
//! # Retry Strategy
//!
//! Every request goes through [`with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: linear, `attempt × backoff_ms`

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use feedback_dedup_core::embedding::EmbeddingProvider;

use crate::config::{openai_api_key, EmbeddingConfig};
use crate::error::{DedupError, ProviderError};
use crate::retry::{with_retry, RetryPolicy};

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = openai_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            api_key,
            client,
            retry,
        })
    }

    async fn request(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("openai", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("openai", status, &body_text).into());
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest("openai", e))?;
        Ok(parse_openai_response(&json)?.into_iter().next())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        with_retry(&self.retry, "openai embedding", || self.request(text)).await
    }
}

/// Extract the `data[].embedding` arrays in order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::permanent("openai", "invalid response: missing data array"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| to_f32(values))
                .ok_or_else(|| {
                    ProviderError::permanent("openai", "invalid response: missing embedding")
                })
        })
        .collect()
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            url,
            client,
            retry,
        })
    }

    async fn request(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("ollama", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("ollama", status, &body_text).into());
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest("ollama", e))?;
        Ok(parse_ollama_response(&json)?.into_iter().next())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, text: &str) -> Result<Option<Vec<f32>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        with_retry(&self.retry, "ollama embedding", || self.request(text)).await
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            ProviderError::permanent("ollama", "invalid response: missing embeddings array")
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding.as_array().map(|values| to_f32(values)).ok_or_else(|| {
                ProviderError::permanent("ollama", "invalid response: embedding is not an array")
            })
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
///
/// `"disabled"` is a configuration error here: there is nothing to embed with.
pub fn create_provider(
    config: &EmbeddingConfig,
    retry: RetryPolicy,
) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Err(DedupError::Config(
            "embedding provider is disabled; set [embedding] provider in config".into(),
        )
        .into()),
        "openai" => Ok(Box::new(OpenAIProvider::new(config, retry)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config, retry)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
