//! OpenAI-compatible completion client.
//!
//! Talks to any endpoint exposing `/chat/completions` and `/embeddings` with the
//! OpenAI wire format (OpenAI itself, Azure-style proxies, local gateways).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lotwise_ai::{
    CompletionClient, CompletionOptions, CompletionRequest, ProviderContent, ProviderError,
    RawCompletion, Usage,
};

use super::pricing::PricingTable;

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub timeout: Duration,
}

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    settings: OpenAiSettings,
    pricing: PricingTable,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            pricing: PricingTable::default(),
        })
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ProviderError> {
        let response = self
            .http
            .post(self.endpoint(path))
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.settings.timeout)
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn send(
        &self,
        request: &CompletionRequest,
        options: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError> {
        let started = Instant::now();

        let (content, usage, model_name) = match request {
            CompletionRequest::Chat { system, prompt } => {
                let body = ChatRequest {
                    model: &self.settings.chat_model,
                    messages: vec![
                        ChatMessage {
                            role: "system",
                            content: system,
                        },
                        ChatMessage {
                            role: "user",
                            content: prompt,
                        },
                    ],
                    temperature: options.temperature,
                    max_tokens: options.max_tokens,
                    response_format: ResponseFormat {
                        kind: "json_object",
                    },
                };
                let response: ChatResponse = self.post("chat/completions", &body).await?;
                let text = response
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default();
                (
                    ProviderContent::Text(text),
                    response.usage.map(WireUsage::into_usage).unwrap_or_default(),
                    response.model.unwrap_or_else(|| self.settings.chat_model.clone()),
                )
            }
            CompletionRequest::Embedding { input } => {
                let body = EmbeddingRequest {
                    model: &self.settings.embedding_model,
                    input,
                };
                let response: EmbeddingResponse = self.post("embeddings", &body).await?;
                let vector = response
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .unwrap_or_default();
                (
                    ProviderContent::Embedding(vector),
                    response.usage.map(WireUsage::into_usage).unwrap_or_default(),
                    response
                        .model
                        .unwrap_or_else(|| self.settings.embedding_model.clone()),
                )
            }
        };

        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let cost_estimate_usd = self.pricing.estimate(&model_name, &usage);
        debug!(
            model = %model_name,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            latency_ms,
            "provider call completed"
        );

        Ok(RawCompletion {
            content,
            usage,
            cost_estimate_usd,
            latency_ms,
            model_name,
        })
    }
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(?retry_after, "provider rate limited request");
        return ProviderError::RateLimited { retry_after };
    }
    // Provider error bodies can be large HTML pages; keep the head only.
    let body: String = body.chars().take(512).collect();
    ProviderError::Status {
        status: status.as_u16(),
        body,
    }
}

// Wire format -------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage::new(self.prompt_tokens, self.completion_tokens)
    }
}
