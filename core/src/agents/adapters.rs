//! HTTP adapters for the three chat-completion vendors.
//!
//! Groq and OpenRouter speak the OpenAI-compatible wire format and share one
//! implementation; Gemini has its own request and response shapes. Every
//! adapter collapses transport errors, non-2xx statuses and malformed bodies
//! into a [`ProviderOutcome::Failed`] and logs a warning.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use super::messages::{CallOptions, ChatMessage, ContentPart, MessageContent, Role};
use super::providers::{
    failed, finish_completion, ChatProvider, FailureReason, ProviderBinding, ProviderKind,
    ProviderOutcome,
};

pub const GROQ_DEFAULT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const OPENROUTER_DEFAULT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const GEMINI_DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";
const OPENROUTER_REFERER: &str = "https://github.com/answerhunter/answerhunter";
const OPENROUTER_TITLE: &str = "AnswerHunter";

/// Shared HTTP client. Only connection establishment is bounded; requests
/// themselves run until the provider answers or the connection drops.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(concat!("AnswerHunter/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to construct HTTP client")
}

/// Adapter for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiCompatibleAdapter {
    client: Client,
    kind: ProviderKind,
    default_url: String,
    extra_headers: Vec<(&'static str, &'static str)>,
}

impl OpenAiCompatibleAdapter {
    pub fn groq(client: Client) -> Self {
        Self {
            client,
            kind: ProviderKind::Groq,
            default_url: GROQ_DEFAULT_URL.to_string(),
            extra_headers: Vec::new(),
        }
    }

    pub fn openrouter(client: Client) -> Self {
        Self::openrouter_at(client, OPENROUTER_DEFAULT_URL)
    }

    pub fn openrouter_at(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            kind: ProviderKind::OpenRouter,
            default_url: url.into(),
            extra_headers: vec![
                ("HTTP-Referer", OPENROUTER_REFERER),
                ("X-Title", OPENROUTER_TITLE),
            ],
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn invoke(
        &self,
        binding: &ProviderBinding,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> ProviderOutcome {
        let url = binding.endpoint.as_deref().unwrap_or(&self.default_url);
        let mut request = self.client.post(url).bearer_auth(&binding.api_key);
        for (name, value) in &self.extra_headers {
            request = request.header(*name, *value);
        }

        let payload = serde_json::json!({
            "model": binding.model,
            "messages": openai_messages(messages),
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let body = match send_json(request, &payload).await {
            Ok(body) => body,
            Err(reason) => return failed(self.kind, reason),
        };

        match extract_openai_content(&body) {
            Some(content) => finish_completion(self.kind, &content, options),
            None => failed(
                self.kind,
                FailureReason::Malformed("missing choices[0].message.content".into()),
            ),
        }
    }
}

/// Adapter for Gemini's `generateContent` endpoint.
pub struct GeminiAdapter {
    client: Client,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, GEMINI_DEFAULT_BASE_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn invoke(
        &self,
        binding: &ProviderBinding,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> ProviderOutcome {
        let base_url = binding.endpoint.as_deref().unwrap_or(&self.base_url);
        let endpoint = format!(
            "{}/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            binding.model
        );
        let request = self
            .client
            .post(endpoint)
            .header(GEMINI_API_KEY_HEADER, binding.api_key.as_str());

        let body = match send_json(request, &gemini_payload(messages, options)).await {
            Ok(body) => body,
            Err(reason) => return failed(ProviderKind::Gemini, reason),
        };

        match extract_gemini_content(&body) {
            Some(content) => finish_completion(ProviderKind::Gemini, &content, options),
            None => failed(
                ProviderKind::Gemini,
                FailureReason::Malformed("missing candidates[0].content.parts".into()),
            ),
        }
    }
}

async fn send_json(request: RequestBuilder, payload: &Value) -> Result<Value, FailureReason> {
    let response = request
        .json(payload)
        .send()
        .await
        .map_err(|err| FailureReason::Transport(err.without_url().to_string()))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FailureReason::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        });
    }
    if !status.is_success() {
        return Err(FailureReason::Status(status.as_u16()));
    }

    response
        .json::<Value>()
        .await
        .map_err(|err| FailureReason::Malformed(err.without_url().to_string()))
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored and the
/// caller's default cool-down applies.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn openai_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let content = match &m.content {
                MessageContent::Text(text) => Value::String(text.clone()),
                MessageContent::Parts(parts) => Value::Array(
                    parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text { text } => {
                                serde_json::json!({ "type": "text", "text": text })
                            }
                            ContentPart::Image { image } => serde_json::json!({
                                "type": "image_url",
                                "image_url": { "url": image.data_uri() },
                            }),
                        })
                        .collect(),
                ),
            };
            serde_json::json!({
                "role": m.role.as_str(),
                "content": content,
            })
        })
        .collect()
}

fn gemini_payload(messages: &[ChatMessage], options: &CallOptions) -> Value {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n\n");

    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| {
            let parts: Vec<Value> = match &m.content {
                MessageContent::Text(text) => vec![serde_json::json!({ "text": text })],
                MessageContent::Parts(parts) => parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => serde_json::json!({ "text": text }),
                        ContentPart::Image { image } => serde_json::json!({
                            "inline_data": {
                                "mime_type": image.mime_type,
                                "data": image.data,
                            }
                        }),
                    })
                    .collect(),
            };
            serde_json::json!({ "role": "user", "parts": parts })
        })
        .collect();

    let mut payload = serde_json::json!({
        "contents": contents,
        "generationConfig": {
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens,
        }
    });
    if !system.trim().is_empty() {
        payload["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
    }
    payload
}

fn extract_openai_content(body: &Value) -> Option<String> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|val| val.as_str())
        .map(str::to_string)
}

fn extract_gemini_content(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array())?;
    Some(
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(|text| text.as_str()))
            .collect::<String>(),
    )
}
