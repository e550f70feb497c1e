//! Error taxonomy for the pipeline.
//!
//! Most code returns `anyhow::Result`, like the rest of the crate. The typed
//! errors here exist where a caller has to tell failures apart:
//!
//! - [`ProviderError`] separates transient provider failures (retried) from
//!   permanent ones (surfaced immediately).
//! - [`DedupError::Config`] marks fatal startup problems.
//! - [`DedupError::RetriesExhausted`] is what a per-post failure looks like
//!   after the retry budget is spent.

use thiserror::Error;

use feedback_dedup_core::verdict::ParseFailure;

/// A failed call to the embedding or language-model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limits, 5xx responses, timeouts and connection failures.
    #[error("{provider} transient error: {message}")]
    Transient {
        provider: &'static str,
        message: String,
    },
    /// Anything a retry cannot fix (bad request, auth, unexpected shape).
    #[error("{provider} error: {message}")]
    Permanent {
        provider: &'static str,
        message: String,
    },
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    /// Classify a non-success HTTP response. 429 and 5xx are transient.
    pub fn from_status(provider: &'static str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body);
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Transient { provider, message }
        } else {
            ProviderError::Permanent { provider, message }
        }
    }

    /// Classify a transport-level failure.
    pub fn from_reqwest(provider: &'static str, err: reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() || err.is_connect() || err.is_request() {
            ProviderError::Transient { provider, message }
        } else {
            ProviderError::Permanent { provider, message }
        }
    }

    pub fn permanent(provider: &'static str, message: impl Into<String>) -> Self {
        ProviderError::Permanent {
            provider,
            message: message.into(),
        }
    }
}

/// Pipeline-level errors.
#[derive(Debug, Error)]
pub enum DedupError {
    /// Missing credentials, connection string, or invalid settings.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Verifier output that could not be parsed. Logged, never fatal.
    #[error(transparent)]
    MalformedResponse(#[from] ParseFailure),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: String,
    },
}

/// Whether an `anyhow` error wraps a transient [`ProviderError`].
pub fn is_transient(err: &anyhow::Error) -> bool {
    if let Some(p) = err.downcast_ref::<ProviderError>() {
        return p.is_transient();
    }
    matches!(
        err.downcast_ref::<DedupError>(),
        Some(DedupError::Provider(p)) if p.is_transient()
    )
}
