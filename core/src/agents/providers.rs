//! Provider identities, per-call bindings and the adapter seam.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::messages::{CallOptions, ChatMessage};
use crate::settings::{keys, Settings};

pub const GROQ_DEFAULT_FAST_MODEL: &str = "llama-3.1-8b-instant";
pub const GROQ_DEFAULT_VISION_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const OPENROUTER_DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Groq,
    Gemini,
    OpenRouter,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [Self::Groq, Self::Gemini, Self::OpenRouter];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
        }
    }

    /// Case-insensitive; anything unrecognised maps to `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "gemini" => Some(Self::Gemini),
            "openrouter" => Some(Self::OpenRouter),
            _ => None,
        }
    }

    /// Settings key holding this provider's API key.
    pub fn api_key_setting(&self) -> &'static str {
        match self {
            Self::Groq => keys::GROQ_API_KEY,
            Self::Gemini => keys::GEMINI_API_KEY,
            Self::OpenRouter => keys::OPENROUTER_API_KEY,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intent of a request. Each call site has its own ordering, model choice
/// and empty-result convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSite {
    Text,
    Vision,
}

/// Everything an adapter needs from the settings snapshot for one call.
#[derive(Clone)]
pub struct ProviderBinding {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Endpoint override; adapters fall back to their own default.
    pub endpoint: Option<String>,
}

impl ProviderBinding {
    /// Returns `None` when the provider has no API key configured.
    pub fn from_settings(provider: ProviderKind, site: CallSite, settings: &Settings) -> Option<Self> {
        let api_key = settings.get(provider.api_key_setting())?.to_string();
        let (model, endpoint) = match provider {
            ProviderKind::Groq => {
                let model = match site {
                    CallSite::Text => settings
                        .get(keys::GROQ_MODEL_FAST)
                        .unwrap_or(GROQ_DEFAULT_FAST_MODEL),
                    CallSite::Vision => settings
                        .get(keys::GROQ_MODEL_VISION)
                        .unwrap_or(GROQ_DEFAULT_VISION_MODEL),
                };
                (model, settings.get(keys::GROQ_API_URL))
            }
            ProviderKind::Gemini => (
                settings.get(keys::GEMINI_MODEL).unwrap_or(GEMINI_DEFAULT_MODEL),
                None,
            ),
            ProviderKind::OpenRouter => (
                settings
                    .get(keys::OPENROUTER_MODEL_SMART)
                    .unwrap_or(OPENROUTER_DEFAULT_MODEL),
                None,
            ),
        };
        Some(Self {
            provider,
            api_key,
            model: model.to_string(),
            endpoint: endpoint.map(str::to_string),
        })
    }
}

impl fmt::Debug for ProviderBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderBinding")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Why an adapter produced no text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty completion")]
    Empty,
    #[error("completion too short ({len} < {min} chars)")]
    TooShort { len: usize, min: usize },
}

/// Tagged adapter result. The orchestrator collapses it to text or absence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Text(String),
    Failed(FailureReason),
}

impl ProviderOutcome {
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            Self::Failed(_) => None,
        }
    }
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// One completion request. Never returns an error: every failure is
    /// reported as [`ProviderOutcome::Failed`].
    async fn invoke(
        &self,
        binding: &ProviderBinding,
        messages: &[ChatMessage],
        options: &CallOptions,
    ) -> ProviderOutcome;
}

/// Trim a raw completion and apply the empty and minimum-length checks.
pub(crate) fn finish_completion(
    provider: ProviderKind,
    raw: &str,
    options: &CallOptions,
) -> ProviderOutcome {
    let text = raw.trim();
    if text.is_empty() {
        return failed(provider, FailureReason::Empty);
    }
    if let Some(min) = options.min_chars {
        let len = text.chars().count();
        if len < min {
            return failed(provider, FailureReason::TooShort { len, min });
        }
    }
    ProviderOutcome::Text(text.to_string())
}

pub(crate) fn failed(provider: ProviderKind, reason: FailureReason) -> ProviderOutcome {
    log::warn!("{provider} request failed: {reason}");
    ProviderOutcome::Failed(reason)
}
