//! Chat-completion client used by the duplicate verifier.
//!
//! [`ChatModel`] is the seam the verifier talks to; [`OpenAiChat`] speaks the
//! OpenAI `/chat/completions` protocol, which also covers compatible
//! gateways via `llm.base_url`. A single call is one attempt: retries are
//! the caller's job.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{llm_api_key, LlmConfig};
use crate::error::ProviderError;

/// A black-box chat model: system + user prompt in, raw text out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier recorded on every suggestion.
    fn model_name(&self) -> &str;

    async fn chat_complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct OpenAiChat {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: system,
                },
                WireMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        debug!(model = %self.model, "Chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest("llm", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status("llm", status, &error_text).into());
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest("llm", e))?;
        Ok(first_content(body)?)
    }
}

fn first_content(body: ChatResponse) -> Result<String, ProviderError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::permanent("llm", "no content in chat response"))
}

/// Build the configured chat model. Fails when no API key is available.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    let api_key = llm_api_key()?;
    Ok(Box::new(OpenAiChat::new(config, api_key)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_roles_in_order() {
        let req = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![
                WireMessage {
                    role: "system",
                    content: "s",
                },
                WireMessage {
                    role: "user",
                    content: "u",
                },
            ],
            temperature: 0.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "u");
        assert_eq!(json["model"], "gpt-4o-mini");
    }

    #[test]
    fn first_choice_content_is_returned() {
        let body: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"[]"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_content(body).unwrap(), "[]");
    }

    #[test]
    fn empty_choices_is_permanent_error() {
        let body: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(!first_content(body).unwrap_err().is_transient());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let config = LlmConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        };
        let chat = OpenAiChat::new(&config, "k".into()).unwrap();
        assert_eq!(chat.base_url, "http://localhost:8080/v1");
        assert_eq!(chat.model_name(), "gpt-4o-mini");
    }
}
