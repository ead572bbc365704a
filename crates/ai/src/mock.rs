//! Scripted completion client for tests/dev.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::completion::{
    CompletionClient, CompletionOptions, CompletionRequest, ProviderContent, ProviderError,
    RawCompletion, Usage,
};

/// Replays queued outcomes in order, one per `send`.
///
/// An empty script yields `ProviderError::Transport`.
#[derive(Debug, Default)]
pub struct ScriptedCompletionClient {
    script: Mutex<VecDeque<Result<RawCompletion, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_text(&self, text: impl Into<String>, usage: Usage) {
        self.push(Ok(RawCompletion {
            content: ProviderContent::Text(text.into()),
            usage,
            cost_estimate_usd: usage.total_tokens as f64 * 0.000_001,
            latency_ms: 5,
            model_name: "scripted".to_string(),
        }));
    }

    pub fn push_embedding(&self, vector: Vec<f32>, usage: Usage) {
        self.push(Ok(RawCompletion {
            content: ProviderContent::Embedding(vector),
            usage,
            cost_estimate_usd: usage.total_tokens as f64 * 0.000_000_1,
            latency_ms: 2,
            model_name: "scripted-embedding".to_string(),
        }));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.push(Err(error));
    }

    pub fn push(&self, outcome: Result<RawCompletion, ProviderError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn send(
        &self,
        request: &CompletionRequest,
        _options: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Transport("script exhausted".to_string())))
    }
}
