use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmClient, LlmError, Prompt};
use crate::config::LlmConfig;

/// Request structure for the chat completions API
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Response structure from the chat completions API
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
///
/// Retries rate limits and server errors with exponential backoff. Timeouts are
/// reported as [`LlmError::Timeout`] so callers can apply their own retry policy.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_retries: usize,
}

impl OpenAiClient {
    /// Create a new client
    ///
    /// # Arguments
    ///
    /// * `api_key` - API key sent as a bearer token
    /// * `config` - Model, endpoint, timeout and retry settings
    pub fn new(api_key: String, config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    /// Make a single API request
    async fn complete_once(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(format!("{}: {}", prompt.key, e))
                } else {
                    LlmError::Unavailable(format!("Network error: {}", e))
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(LlmError::Unavailable(format!("API error {}: {}", status, body)));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(format!("Failed to parse response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed("Empty response from API".to_string()))
    }
}

fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Unavailable(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("504")
        }
        _ => false,
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        loop {
            match self.complete_once(prompt).await {
                Ok(text) => {
                    log::debug!(
                        "LLM call {} took {:?} (attempt {})",
                        prompt.key,
                        start.elapsed(),
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    log::warn!("Retry {}/{} after error: {}", attempt + 1, self.max_retries, e);
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
