//! Language model capability used by the agents.

pub mod gemini;
pub mod sse;

use crate::error::AgentError;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub use gemini::GeminiClient;

/// One generation request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Ask the provider for a bare JSON body.
    pub json_output: bool,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            max_output_tokens: 2048,
            json_output: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AgentError>;

    /// Stream text chunks into `tokens` and return the full text.
    ///
    /// The default implementation emits the blocking completion as a single
    /// chunk, so concatenated chunks always equal the returned text.
    async fn stream(&self, request: &CompletionRequest, tokens: mpsc::Sender<String>) -> Result<String, AgentError> {
        let text = self.complete(request).await?;
        tokens
            .send(text.clone())
            .await
            .map_err(|_| AgentError::ProviderError("token consumer went away".to_string()))?;
        Ok(text)
    }
}

/// Stand-in model used when no API key is configured. Every call fails
/// with a provider error, which drives the fallback path.
pub struct UnconfiguredModel;

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    fn model_name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String, AgentError> {
        Err(AgentError::ProviderError("GEMINI_API_KEY not configured".to_string()))
    }
}
