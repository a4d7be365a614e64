// network.rs — HTTP client for the OpenAI-compatible chat completions API.
// Sends the full transcript, returns the assistant text plus token usage.
// Transient failures are retried by middleware; what remains is classified
// into the transport error family.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::CompletionError;
use crate::session::Message;
use crate::tracking;

/// A successful completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

/// The remote model, seen as an opaque call: transcript in, reply out.
#[async_trait]
pub trait CompletionApi {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, CompletionError>;
}

pub struct OpenAiClient {
    http: ClientWithMiddleware,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let http = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            http,
            url: config.completions_url(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl CompletionApi for OpenAiClient {
    async fn complete(&self, messages: &[Message]) -> Result<Completion, CompletionError> {
        let body = build_request_body(&self.model, self.temperature, messages);

        debug!(url = %self.url, turns = messages.len(), "Sending chat completion request");

        let response = self
            .http
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(%e, "Chat completion request failed");
                CompletionError::Network(e.to_string())
            })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            CompletionError::Network(format!("failed to read response body: {e}"))
        })?;

        debug!(status = %status, body_len = response_text.len(), "API response received");

        if !status.is_success() {
            error!(status = %status, body = %truncate_str(&response_text, 500), "Chat completion API error");
            return Err(classify_status(status, &response_text));
        }

        let parsed: Value = serde_json::from_str(&response_text).map_err(|e| {
            CompletionError::Upstream(format!("response is not JSON: {e}"))
        })?;

        let (content, prompt_tokens, completion_tokens) = extract_completion(&parsed)?;
        let cost_usd = tracking::calculate_cost(&self.model, prompt_tokens, completion_tokens);

        info!(
            prompt_tokens,
            completion_tokens,
            cost_usd,
            text_preview = %truncate_str(&content, 80),
            "Completion received"
        );

        Ok(Completion {
            content,
            prompt_tokens,
            completion_tokens,
            cost_usd,
        })
    }
}

/// Build the JSON body for `POST /chat/completions`.
fn build_request_body(model: &str, temperature: f32, messages: &[Message]) -> Value {
    json!({
        "model": model,
        "temperature": temperature,
        "messages": messages,
    })
}

/// Map a non-success HTTP status to its transport error kind.
fn classify_status(status: StatusCode, body: &str) -> CompletionError {
    let detail = format!("HTTP {}: {}", status, api_error_message(body));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimit(detail),
        _ => CompletionError::Upstream(detail),
    }
}

/// Pull `error.message` out of an API error body, or fall back to the raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate_str(body, 200))
}

/// Extract assistant text and token usage from a chat completion response.
fn extract_completion(response: &Value) -> Result<(String, u64, u64), CompletionError> {
    // { "choices": [{ "message": { "content": "..." } }], "usage": { ... } }
    let choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| {
            CompletionError::Upstream(format!(
                "no choices in response: {}",
                truncate_str(&response.to_string(), 200)
            ))
        })?;

    if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
        if reason != "stop" {
            warn!(reason, "Completion had non-stop finish reason");
        }
    }

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| CompletionError::Upstream("choice has no message content".to_string()))?
        .to_string();

    let usage = response.get("usage");
    let tokens = |field: &str| {
        usage
            .and_then(|u| u.get(field))
            .and_then(|t| t.as_u64())
            .unwrap_or(0)
    };
    if usage.is_none() {
        warn!("Response carried no usage block, recording 0 tokens");
    }

    Ok((content, tokens("prompt_tokens"), tokens("completion_tokens")))
}

/// Truncate a string for display, on a char boundary.
fn truncate_str(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}…", &s[..idx]),
    }
}
