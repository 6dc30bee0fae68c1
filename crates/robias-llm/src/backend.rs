//! LLM backend trait and concrete implementations.
//!
//! Backends:
//!   OpenAiBackend           — OpenAI Responses API (gpt-4o, gpt-4.1, …),
//!                             accepts inline text and stored-file parts
//!   OpenAiCompatibleBackend — any OpenAI-compatible /v1/chat/completions
//!                             endpoint (vLLM, LMStudio, Ollama, …), text only
//!
//! Both backends request strict JSON-schema output and return the parsed
//! JSON value together with the API-reported token usage.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use robias_common::{RobiasError, SandboxClient, TokenUsage};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::retry::RetryPolicy;
use crate::schema::OutputSchema;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Network policy blocked this request: {0}")]
    PolicyBlocked(String),
    #[error("Rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },
    #[error("API error [{status}]: {message}")]
    ApiError { status: u16, message: String },
    #[error("Model refused the request: {0}")]
    Refused(String),
    #[error("Model returned no usable output: {0}")]
    InvalidOutput(String),
    #[error("Unsupported input: {0}")]
    Unsupported(String),
}

impl From<RobiasError> for LlmError {
    fn from(err: RobiasError) -> Self {
        match err {
            RobiasError::Http(e)           => LlmError::Http(e),
            RobiasError::SecurityError(m)  => LlmError::PolicyBlocked(m),
            RobiasError::Config(m)         => LlmError::Unavailable(m),
        }
    }
}

impl LlmError {
    /// Whether this failure is transient and the call may be repeated.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            LlmError::Http(e) => {
                if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() || e.is_decode() {
                    RetryPolicy::Retryable { after: None }
                } else {
                    RetryPolicy::NonRetryable
                }
            }
            LlmError::Serde(_)
            | LlmError::Unavailable(_)
            | LlmError::InvalidOutput(_) => RetryPolicy::Retryable { after: None },
            LlmError::RateLimitExceeded { retry_after } => {
                RetryPolicy::Retryable { after: *retry_after }
            }
            LlmError::ApiError { status, .. } => match status {
                408 | 409 | 429 | 500..=599 => RetryPolicy::Retryable { after: None },
                _ => RetryPolicy::NonRetryable,
            },
            LlmError::Io(_)
            | LlmError::PolicyBlocked(_)
            | LlmError::Refused(_)
            | LlmError::Unsupported(_) => RetryPolicy::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.retry_policy(), RetryPolicy::Retryable { .. })
    }
}

// ── Request / Response ────────────────────────────────────────────────────────

/// One part of the user turn, in the order it is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputPart {
    Text { text: String },
    /// A document previously uploaded to the provider's file store.
    File { file_id: String },
}

impl InputPart {
    pub fn text(text: impl Into<String>) -> Self {
        InputPart::Text { text: text.into() }
    }

    pub fn file(file_id: impl Into<String>) -> Self {
        InputPart::File { file_id: file_id.into() }
    }
}

#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// System-level instructions (intro + output format).
    pub instructions: String,
    pub input: Vec<InputPart>,
    pub schema: OutputSchema,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct StructuredResponse {
    /// The model output parsed as JSON.
    pub value: serde_json::Value,
    /// The raw output text, kept for auditing.
    pub raw_text: String,
    pub model: String,
    pub usage: TokenUsage,
}

// ── Trait ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete_structured(&self, req: StructuredRequest) -> Result<StructuredResponse, LlmError>;
    fn model_id(&self) -> &str;
    fn is_local(&self) -> bool;
    /// Whether `InputPart::File` parts are understood.
    fn supports_file_input(&self) -> bool;
}

// ── Shared HTTP helpers ───────────────────────────────────────────────────────

/// Reads `retry-after-ms` (OpenAI) or `retry-after` (seconds) response headers.
/// Values that do not fit a `Duration` are ignored.
pub(crate) fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    let header_secs = |name: &str, scale: f64| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|n| n.is_finite())
            .and_then(|n| Duration::try_from_secs_f64(n.max(0.0) / scale).ok())
    };
    header_secs("retry-after-ms", 1_000.0).or_else(|| header_secs(reqwest::header::RETRY_AFTER.as_str(), 1.0))
}

pub(crate) async fn check_response_status(resp: reqwest::Response) -> Result<serde_json::Value, LlmError> {
    let status = resp.status().as_u16();
    let retry_after = retry_after_from_headers(resp.headers());
    let text = resp.text().await?;

    if status == 429 {
        debug!(?retry_after, body = %text, "Rate limited");
        return Err(LlmError::RateLimitExceeded { retry_after });
    }

    if status >= 400 {
        let body: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::Null);
        let msg = body["error"]["message"]
            .as_str()
            .or_else(|| body["message"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| truncate(&text, 300));
        return Err(LlmError::ApiError { status, message: msg });
    }

    Ok(serde_json::from_str(&text)?)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

fn parse_output_json(text: &str) -> Result<serde_json::Value, LlmError> {
    if text.trim().is_empty() {
        return Err(LlmError::InvalidOutput("empty output text".to_string()));
    }
    serde_json::from_str(text)
        .map_err(|e| LlmError::InvalidOutput(format!("output is not valid JSON: {e}")))
}

// ── 1. OpenAI Responses API ───────────────────────────────────────────────────

pub struct OpenAiBackend {
    pub model: String,
    pub base_url: String,
    api_key: SecretString,
    client: SandboxClient,
}

impl OpenAiBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>, client: SandboxClient) -> Self {
        Self {
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            api_key,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, req: &StructuredRequest) -> serde_json::Value {
        let content: Vec<serde_json::Value> = req.input.iter()
            .map(|part| match part {
                InputPart::Text { text }    => serde_json::json!({"type": "input_text", "text": text}),
                InputPart::File { file_id } => serde_json::json!({"type": "input_file", "file_id": file_id}),
            })
            .collect();

        let mut body = serde_json::json!({
            "model":        req.model.as_deref().unwrap_or(&self.model),
            "instructions": req.instructions,
            "input": [{
                "role":    "user",
                "content": content,
            }],
            "text": {
                "format": {
                    "type":   "json_schema",
                    "name":   req.schema.name,
                    "schema": req.schema.schema,
                    "strict": req.schema.strict,
                }
            },
        });
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

/// Extract the structured output from a Responses API payload.
pub(crate) fn parse_responses_output(
    json: &serde_json::Value,
    fallback_model: &str,
) -> Result<StructuredResponse, LlmError> {
    if json["status"].as_str() == Some("incomplete") {
        let reason = json["incomplete_details"]["reason"].as_str().unwrap_or("unknown");
        return Err(LlmError::InvalidOutput(format!("response incomplete: {reason}")));
    }

    let mut text: Option<String> = None;
    for item in json["output"].as_array().into_iter().flatten() {
        if item["type"].as_str() != Some("message") {
            continue;
        }
        for part in item["content"].as_array().into_iter().flatten() {
            match part["type"].as_str() {
                Some("output_text") => {
                    text = part["text"].as_str().map(str::to_string);
                }
                Some("refusal") => {
                    let why = part["refusal"].as_str().unwrap_or("no reason given");
                    return Err(LlmError::Refused(why.to_string()));
                }
                _ => {}
            }
            if text.is_some() {
                break;
            }
        }
        if text.is_some() {
            break;
        }
    }

    let raw_text = text.ok_or_else(|| LlmError::InvalidOutput("no output_text in response".to_string()))?;
    let value = parse_output_json(&raw_text)?;

    Ok(StructuredResponse {
        value,
        raw_text,
        model: json["model"].as_str().unwrap_or(fallback_model).to_string(),
        usage: TokenUsage::new(
            json["usage"]["input_tokens"].as_u64().unwrap_or(0),
            json["usage"]["output_tokens"].as_u64().unwrap_or(0),
        ),
    })
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete_structured(&self, req: StructuredRequest) -> Result<StructuredResponse, LlmError> {
        let url = format!("{}/v1/responses", self.base_url.trim_end_matches('/'));
        let body = self.build_body(&req);
        let resp = self.client
            .post(&url)?
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;
        let json = check_response_status(resp).await?;
        parse_responses_output(&json, req.model.as_deref().unwrap_or(&self.model))
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { false }
    fn supports_file_input(&self) -> bool { true }
}

// ── 2. OpenAI-Compatible chat completions (vLLM, LMStudio, Ollama, …) ────────

pub struct OpenAiCompatibleBackend {
    pub base_url: String,
    pub model: String,
    api_key: Option<SecretString>,
    client: SandboxClient,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        client: SandboxClient,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key,
            client,
        }
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(k) => req.bearer_auth(k.expose_secret()),
            None    => req,
        }
    }

    fn build_body(&self, req: &StructuredRequest) -> Result<serde_json::Value, LlmError> {
        let mut user_text = String::new();
        for part in &req.input {
            match part {
                InputPart::Text { text } => user_text.push_str(text),
                InputPart::File { file_id } => {
                    return Err(LlmError::Unsupported(format!(
                        "{} cannot read stored file {file_id}; use plain text or local PDF input",
                        self.base_url
                    )));
                }
            }
        }

        let mut body = serde_json::json!({
            "model": req.model.as_deref().unwrap_or(&self.model),
            "messages": [
                {"role": "system", "content": req.instructions},
                {"role": "user",   "content": user_text},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name":   req.schema.name,
                    "schema": req.schema.schema,
                    "strict": req.schema.strict,
                }
            },
        });
        if let Some(t) = req.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        Ok(body)
    }

    fn is_loopback(&self) -> bool {
        let url = self.base_url.to_lowercase();
        url.contains("://localhost") || url.contains("://127.0.0.1")
    }
}

/// Extract the structured output from a chat-completions payload.
pub(crate) fn parse_chat_output(
    json: &serde_json::Value,
    fallback_model: &str,
) -> Result<StructuredResponse, LlmError> {
    let choice = &json["choices"][0];
    if let Some(refusal) = choice["message"]["refusal"].as_str() {
        return Err(LlmError::Refused(refusal.to_string()));
    }
    if choice["finish_reason"].as_str() == Some("length") {
        return Err(LlmError::InvalidOutput("output truncated at max tokens".to_string()));
    }

    let raw_text = choice["message"]["content"].as_str().unwrap_or("").to_string();
    let value = parse_output_json(&raw_text)?;

    Ok(StructuredResponse {
        value,
        raw_text,
        model: json["model"].as_str().unwrap_or(fallback_model).to_string(),
        usage: TokenUsage::new(
            json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        ),
    })
}

#[async_trait]
impl LlmBackend for OpenAiCompatibleBackend {
    async fn complete_structured(&self, req: StructuredRequest) -> Result<StructuredResponse, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.build_body(&req)?;
        let resp = self.auth(self.client.post(&url)?).json(&body).send().await?;
        let json = check_response_status(resp).await?;
        parse_chat_output(&json, req.model.as_deref().unwrap_or(&self.model))
    }

    fn model_id(&self) -> &str { &self.model }
    fn is_local(&self) -> bool { self.is_loopback() }
    fn supports_file_input(&self) -> bool { false }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
