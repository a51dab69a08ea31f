//! OpenRouter-format chat completions client.
//!
//! Every call acquires the shared rate limiter before sending, so the
//! configured spacing holds across all stages and workers. Transient
//! failures retry with exponential backoff; other 4xx are final.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::classify_http_status;
use super::{ChatMessage, ChatOptions, LlmClient, LlmError, LlmErrorKind};
use crate::config::LlmConfig;
use crate::limiter::RateLimiter;
use crate::progress::ProgressTracker;

/// Chat-completions client speaking the OpenRouter wire format.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    url: String,
    model: String,
    default_temperature: f64,
    default_max_tokens: u64,
    max_retries: u32,
    limiter: Arc<RateLimiter>,
    tracker: Arc<ProgressTracker>,
}

impl OpenRouterClient {
    /// Create a new client from config, sharing the process-wide limiter and
    /// progress tracker.
    pub fn new(
        config: &LlmConfig,
        limiter: Arc<RateLimiter>,
        tracker: Arc<ProgressTracker>,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| LlmError::network_error(format!("http client init failed: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            default_temperature: config.temperature,
            default_max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            limiter,
            tracker,
        })
    }

    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network_error(format!("request timed out: {e}"))
                } else {
                    LlmError::network_error(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network_error(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            let code = status.as_u16();
            return Err(match classify_http_status(code) {
                LlmErrorKind::RateLimited => LlmError::rate_limited(body, retry_after),
                LlmErrorKind::ClientError => LlmError::client_error(code, body),
                _ => LlmError::server_error(code, body),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LlmError::parse_error(format!("unexpected response shape: {e}")))?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "token usage"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::parse_error("no choices in response".to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: options.temperature.unwrap_or(self.default_temperature),
            max_tokens: options.max_tokens.unwrap_or(self.default_max_tokens),
        };

        let mut attempt = 0u32;
        loop {
            self.limiter.acquire().await;
            tracing::debug!(model = %self.model, attempt, "sending chat completion");

            match self.send_once(&request).await {
                Ok(content) => {
                    self.tracker.record_llm_call();
                    return Ok(content);
                }
                Err(e) if e.is_transient() && attempt + 1 < self.max_retries => {
                    let delay = e.suggested_delay(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_s = delay.as_secs(),
                        "transient LLM failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "LLM call failed");
                    return Err(e);
                }
            }
        }
    }
}

/// Chat-completions request body.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u64,
}

/// Chat-completions response body.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_wire_format() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        let request = ChatRequest {
            model: "google/gemini-2.5-flash",
            messages: &messages,
            temperature: 0.3,
            max_tokens: 10_000,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "google/gemini-2.5-flash");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["max_tokens"], 10_000);
    }

    #[test]
    fn response_content_is_extracted() {
        let body = r#"{
            "choices": [{"message": {"content": "answer"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        let content = parsed.choices.into_iter().next().unwrap().message.content;
        assert_eq!(content.as_deref(), Some("answer"));
    }

    #[test]
    fn response_without_usage_still_parses() {
        let body = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices.len(), 1);
    }
}
