//! Completion provider abstraction.
//!
//! Implementations only speak the provider's wire protocol ([`CompletionClient::send`]).
//! Parsing and validation of the response happen once, in [`CompletionClient::execute`],
//! so every backend surfaces invalid output the same way: as a retryable
//! [`ProviderError::InvalidOutput`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;

use crate::result::ValidationError;
use crate::schema::OutputValidator;

/// Provider-agnostic request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionRequest {
    /// Structured text generation; the provider is asked for a JSON object.
    Chat { system: String, prompt: String },
    /// Vector embedding of a single input text.
    Embedding { input: String },
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// What the provider returned, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderContent {
    Text(String),
    Embedding(Vec<f32>),
}

/// Unvalidated provider response with its accounting data.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCompletion {
    pub content: ProviderContent,
    pub usage: Usage,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
    pub model_name: String,
}

/// A parsed-and-validated provider result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub data: JsonValue,
    pub raw_response: String,
    pub usage: Usage,
    pub cost_estimate_usd: f64,
    pub latency_ms: u64,
    pub model_name: String,
}

/// Accounting data for a provider call that was billed but produced unusable output.
#[derive(Debug, Clone, PartialEq)]
pub struct BilledCall {
    pub raw_response: String,
    pub usage: Usage,
    pub cost_estimate_usd: f64,
    pub model_name: String,
}

/// Every provider-side failure. All variants are retryable: a re-issued
/// request may succeed where this one did not.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider output: {source}")]
    InvalidOutput {
        #[source]
        source: ValidationError,
        call: Box<BilledCall>,
    },
}

impl ProviderError {
    /// The billed call behind this error, when the provider did respond.
    pub fn billed_call(&self) -> Option<&BilledCall> {
        match self {
            ProviderError::InvalidOutput { call, .. } => Some(call),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync + 'static {
    /// Issue one request to the provider and return its raw response.
    async fn send(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError>;

    /// Send the request, then parse and validate the response for the job type.
    async fn execute(
        &self,
        request: &CompletionRequest,
        validator: &OutputValidator,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let raw = self.send(request, options).await?;

        let (raw_response, checked) = match &raw.content {
            ProviderContent::Text(text) => (text.clone(), validator.validate_text(text)),
            ProviderContent::Embedding(vector) => {
                let candidate = json!({
                    "embedding": vector,
                    "dimensions": vector.len(),
                });
                (candidate.to_string(), validator.validate(&candidate))
            }
        };

        match checked {
            Ok(data) => Ok(Completion {
                data,
                raw_response,
                usage: raw.usage,
                cost_estimate_usd: raw.cost_estimate_usd,
                latency_ms: raw.latency_ms,
                model_name: raw.model_name,
            }),
            Err(source) => Err(ProviderError::InvalidOutput {
                source,
                call: Box::new(BilledCall {
                    raw_response,
                    usage: raw.usage,
                    cost_estimate_usd: raw.cost_estimate_usd,
                    model_name: raw.model_name,
                }),
            }),
        }
    }
}

#[async_trait]
impl<T: CompletionClient + ?Sized> CompletionClient for std::sync::Arc<T> {
    async fn send(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError> {
        (**self).send(request, options).await
    }

    async fn execute(
        &self,
        request: &CompletionRequest,
        validator: &OutputValidator,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        (**self).execute(request, validator, options).await
    }
}
