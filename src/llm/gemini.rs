//! Gemini API client
//!
//! One long-lived reqwest::Client per model for connection pooling.
//! Blocking calls use `generateContent`; streaming uses
//! `streamGenerateContent?alt=sse` and forwards each candidate chunk.

use super::sse::SseParser;
use super::{CompletionRequest, LanguageModel};
use crate::error::AgentError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self, streaming: bool) -> String {
        if streaming {
            format!("{}/models/{}:streamGenerateContent?alt=sse", BASE_URL, self.model)
        } else {
            format!("{}/models/{}:generateContent", BASE_URL, self.model)
        }
    }

    async fn send(&self, request: &CompletionRequest, streaming: bool) -> Result<reqwest::Response, AgentError> {
        if self.api_key.is_empty() {
            return Err(AgentError::ProviderError("GEMINI_API_KEY not configured".to_string()));
        }

        debug!(model = %self.model, streaming, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint(streaming))
            .header("x-goog-api-key", &self.api_key)
            .json(&GeminiRequest::from(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(model = %self.model, status = status.as_u16(), "Gemini API error response");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                AgentError::ProviderError(format!("rate limited: {}", text))
            } else {
                AgentError::ProviderError(format!("HTTP {}: {}", status, text))
            });
        }

        Ok(response)
    }
}

fn transport_error(e: reqwest::Error) -> AgentError {
    if e.is_timeout() {
        AgentError::Timeout(e.to_string())
    } else {
        AgentError::ProviderError(format!("Gemini API request failed: {}", e))
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, AgentError> {
        let response = self.send(request, false).await?;
        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedOutput(format!("Gemini parse error: {}", e)))?;

        let text = body
            .text()
            .ok_or_else(|| AgentError::MalformedOutput("empty response from Gemini".to_string()))?;

        info!(
            model = %self.model,
            finish_reason = body.finish_reason().unwrap_or("unknown"),
            chars = text.len(),
            "Gemini response received"
        );
        Ok(text)
    }

    async fn stream(&self, request: &CompletionRequest, tokens: mpsc::Sender<String>) -> Result<String, AgentError> {
        let response = self.send(request, true).await?;
        let bytes = response.bytes_stream();
        futures::pin_mut!(bytes);
        let mut parser = SseParser::new();
        let mut full = String::new();

        loop {
            let (events, finished) = match bytes.next().await {
                Some(Ok(chunk)) => (parser.feed(&chunk), false),
                Some(Err(e)) => return Err(transport_error(e)),
                None => (parser.finish().into_iter().collect::<Vec<_>>(), true),
            };

            for event in events {
                let chunk: GeminiResponse = serde_json::from_str(&event.data)
                    .map_err(|e| AgentError::MalformedOutput(format!("bad stream chunk: {}", e)))?;
                if let Some(text) = chunk.text() {
                    full.push_str(&text);
                    tokens
                        .send(text)
                        .await
                        .map_err(|_| AgentError::ProviderError("token consumer went away".to_string()))?;
                }
            }

            if finished {
                break;
            }
        }

        if full.is_empty() {
            return Err(AgentError::MalformedOutput("empty stream from Gemini".to_string()));
        }
        debug!(model = %self.model, chars = full.len(), "Gemini stream finished");
        Ok(full)
    }
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

impl From<&CompletionRequest> for GeminiRequest {
    fn from(request: &CompletionRequest) -> Self {
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: request.temperature,
                top_p: 0.9,
                max_output_tokens: request.max_output_tokens,
                response_mime_type: request.json_output.then_some("application/json"),
            },
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system.clone(),
                }],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    finish_reason: Option<String>,
}

impl GeminiResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text: String = candidate.content.parts.iter().map(|p| p.text.as_str()).collect();
        (!text.is_empty()).then_some(text)
    }

    fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = CompletionRequest::new("You are an investment analyst", "What is NAV?").json();
        let body = serde_json::to_value(GeminiRequest::from(&request)).unwrap();

        assert_eq!(body["contents"][0]["parts"][0]["text"], "What is NAV?");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are an investment analyst");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_response_text_joins_parts() {
        let body: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello "}, {"text": "there"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3}
        }))
        .unwrap();
        assert_eq!(body.text().as_deref(), Some("Hello there"));
        assert_eq!(body.finish_reason(), Some("STOP"));

        let empty: GeminiResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(empty.text().is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_provider_error() {
        let client = GeminiClient::new("", "gemini-2.0-flash").unwrap();
        let err = client
            .complete(&CompletionRequest::new("system", "prompt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ProviderError(_)));
    }
}
