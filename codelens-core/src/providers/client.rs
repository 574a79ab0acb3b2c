//! Provider execution capability
//!
//! [`ProviderClient`] is the single seam between the engine and an AI backend:
//! send a prompt, get text plus token usage back. [`HttpProviderClient`] speaks the
//! OpenAI-compatible chat-completions protocol that every catalog provider exposes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::ProviderKind;
use crate::error::{Error, FailureKind, Result};
use crate::types::{Prompt, TokenUsage};

/// Everything needed to address one provider call.
#[derive(Clone)]
pub struct ProviderTarget {
    pub provider: ProviderKind,
    pub model: String,
    /// Base URL of the OpenAI-compatible API
    pub endpoint: String,
    pub credential: String,
    pub headers: Vec<(String, String)>,
}

impl std::fmt::Debug for ProviderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTarget")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask for a JSON object response where supported
    pub json_mode: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
            json_mode: true,
        }
    }
}

/// Text and usage returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// A failed provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, message)
    }
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderFailure::new(FailureKind::Timeout, "request timed out")
        } else if err.is_connect() {
            ProviderFailure::transport("connection failed")
        } else if err.is_decode() {
            ProviderFailure::malformed(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderFailure::transport(format!("HTTP {}", status))
        } else {
            ProviderFailure::transport(err.to_string())
        }
    }
}

/// Execute a prompt against a provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn execute(
        &self,
        target: &ProviderTarget,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> std::result::Result<Completion, ProviderFailure>;
}

/// OpenAI-compatible chat-completions client.
pub struct HttpProviderClient {
    http_client: reqwest::Client,
}

impl HttpProviderClient {
    /// `timeout` is the transport-level ceiling; the executor applies its own
    /// per-attempt timeout on top.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    fn request_headers(
        target: &ProviderTarget,
    ) -> std::result::Result<HeaderMap, ProviderFailure> {
        let invalid = |what: &str, e: &dyn std::fmt::Display| {
            ProviderFailure::new(FailureKind::Initialization, format!("invalid {what}: {e}"))
        };

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", target.credential))
            .map_err(|e| invalid("credential", &e))?;
        headers.insert(AUTHORIZATION, auth);

        for (name, value) in &target.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid("header", &e))?;
            let value = HeaderValue::from_str(value).map_err(|e| invalid("header", &e))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn execute(
        &self,
        target: &ProviderTarget,
        prompt: &Prompt,
        options: &CompletionOptions,
    ) -> std::result::Result<Completion, ProviderFailure> {
        let url = format!("{}/chat/completions", target.endpoint.trim_end_matches('/'));

        let body = ChatRequest {
            model: &target.model,
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
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            response_format: options.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http_client
            .post(&url)
            .headers(Self::request_headers(target)?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(ProviderFailure::transport(format!(
                "API error ({}): {}",
                status,
                truncate(&error_text, 300)
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderFailure::malformed(format!("failed to parse response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderFailure::malformed("response contained no content"))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens.max(u.prompt_tokens + u.completion_tokens),
            })
            .unwrap_or_default();

        Ok(Completion { content, usage })
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}

/// Request body for POST /chat/completions
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
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

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
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
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}
