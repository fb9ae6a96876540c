use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use time::OffsetDateTime;

use super::adapters::{build_http_client, GeminiAdapter, OpenAiCompatibleAdapter};
use super::messages::{CallOptions, ChatMessage};
use super::providers::{
    CallSite, ChatProvider, FailureReason, ProviderBinding, ProviderKind, ProviderOutcome,
};
use super::quota::{Clock, QuotaTracker, DEFAULT_COOLDOWN};
use crate::settings::Settings;

/// Sentinel a model replies with when the page has no answer options.
pub const NO_OPTIONS_SENTINEL: &str = "SEM_OPCOES";

/// Fully built prompt for one call site.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub site: CallSite,
    pub messages: Vec<ChatMessage>,
    pub options: CallOptions,
}

/// Provider order for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOrdering {
    /// Used when `primaryProvider` is unset or unrecognised.
    pub default_primary: ProviderKind,
    /// Order of the providers that follow the primary.
    pub secondary: Vec<ProviderKind>,
}

/// Fallback order per call site.
///
/// Text and vision have separate secondary orders: after the primary, text
/// tries Groq, OpenRouter, Gemini while vision tries OpenRouter, Groq, Gemini.
/// Both sites default the primary to Groq, so with `primaryProvider` unset
/// vision runs Groq, OpenRouter, Gemini, the same as text. The two orders
/// only differ once a Gemini or OpenRouter primary is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingPolicy {
    pub text: SiteOrdering,
    pub vision: SiteOrdering,
}

impl Default for OrderingPolicy {
    fn default() -> Self {
        Self {
            text: SiteOrdering {
                default_primary: ProviderKind::Groq,
                secondary: vec![
                    ProviderKind::Groq,
                    ProviderKind::OpenRouter,
                    ProviderKind::Gemini,
                ],
            },
            vision: SiteOrdering {
                default_primary: ProviderKind::Groq,
                secondary: vec![
                    ProviderKind::OpenRouter,
                    ProviderKind::Groq,
                    ProviderKind::Gemini,
                ],
            },
        }
    }
}

impl OrderingPolicy {
    pub fn for_site(&self, site: CallSite) -> &SiteOrdering {
        match site {
            CallSite::Text => &self.text,
            CallSite::Vision => &self.vision,
        }
    }

    /// Primary first, then the site's secondary order without duplicates.
    pub fn call_order(&self, site: CallSite, primary: Option<ProviderKind>) -> Vec<ProviderKind> {
        let ordering = self.for_site(site);
        let primary = primary.unwrap_or(ordering.default_primary);
        let mut order = vec![primary];
        for provider in &ordering.secondary {
            if !order.contains(provider) {
                order.push(*provider);
            }
        }
        order
    }
}

/// What happened to one provider during a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Answered,
    /// Replied with the no-options sentinel.
    NoOptions,
    Failed { reason: String },
    MissingKey,
    CoolingDown {
        #[serde(with = "time::serde::rfc3339")]
        until: OffsetDateTime,
    },
    /// No adapter registered for the provider.
    Unavailable,
}

impl AttemptOutcome {
    pub fn invoked(&self) -> bool {
        matches!(self, Self::Answered | Self::NoOptions | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub provider: ProviderKind,
    pub outcome: AttemptOutcome,
}

/// Result of one pass through the fallback chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub text: Option<String>,
    pub attempts: Vec<Attempt>,
}

impl Resolution {
    pub fn answered_by(&self) -> Option<ProviderKind> {
        self.attempts
            .iter()
            .find(|a| a.outcome == AttemptOutcome::Answered)
            .map(|a| a.provider)
    }
}

/// Per-call collaborators: the settings snapshot, the shared quota state and
/// the clock used to read and extend cool-downs.
pub struct ResolveContext<'a> {
    pub settings: &'a Settings,
    pub quota: &'a QuotaTracker,
    pub clock: &'a dyn Clock,
}

/// Walks the providers for a call site in order and returns the first
/// usable completion. Strictly sequential: one provider call at a time.
pub struct FallbackOrchestrator {
    providers: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
    policy: OrderingPolicy,
    default_cooldown: Duration,
}

impl FallbackOrchestrator {
    pub fn new(providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.kind(), p)).collect(),
            policy: OrderingPolicy::default(),
            default_cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Orchestrator wired to the real vendor endpoints.
    pub fn http() -> Result<Self> {
        Ok(Self::with_client(build_http_client()?))
    }

    /// Same as [`FallbackOrchestrator::http`] but sharing an existing client.
    pub fn with_client(client: Client) -> Self {
        let providers: Vec<Arc<dyn ChatProvider>> = vec![
            Arc::new(OpenAiCompatibleAdapter::groq(client.clone())),
            Arc::new(OpenAiCompatibleAdapter::openrouter(client.clone())),
            Arc::new(GeminiAdapter::new(client)),
        ];
        Self::new(providers)
    }

    pub fn with_policy(mut self, policy: OrderingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn policy(&self) -> &OrderingPolicy {
        &self.policy
    }

    pub async fn resolve(&self, ctx: &ResolveContext<'_>, request: &PromptRequest) -> Resolution {
        let order = self
            .policy
            .call_order(request.site, ctx.settings.primary_provider());
        let mut resolution = Resolution::default();

        for provider in order {
            match self.attempt(ctx, request, provider).await {
                Ok(text) => {
                    resolution.text = Some(text);
                    resolution.attempts.push(Attempt {
                        provider,
                        outcome: AttemptOutcome::Answered,
                    });
                    break;
                }
                Err(outcome) => resolution.attempts.push(Attempt { provider, outcome }),
            }
        }

        resolution
    }

    /// Text call sites report "nothing found" as `None`.
    pub async fn resolve_text(
        &self,
        ctx: &ResolveContext<'_>,
        request: &PromptRequest,
    ) -> Option<String> {
        self.resolve(ctx, request).await.text
    }

    /// Vision call sites report "nothing found" as an empty string.
    pub async fn resolve_vision(&self, ctx: &ResolveContext<'_>, request: &PromptRequest) -> String {
        self.resolve(ctx, request).await.text.unwrap_or_default()
    }

    async fn attempt(
        &self,
        ctx: &ResolveContext<'_>,
        request: &PromptRequest,
        provider: ProviderKind,
    ) -> Result<String, AttemptOutcome> {
        let Some(binding) = ProviderBinding::from_settings(provider, request.site, ctx.settings)
        else {
            log::debug!("{provider} skipped: no API key configured");
            return Err(AttemptOutcome::MissingKey);
        };
        let Some(adapter) = self.providers.get(&provider) else {
            log::debug!("{provider} skipped: no adapter registered");
            return Err(AttemptOutcome::Unavailable);
        };
        if ctx.quota.is_exhausted(provider, ctx.clock.now()) {
            let until = ctx
                .quota
                .exhausted_until(provider)
                .unwrap_or_else(|| ctx.clock.now());
            log::debug!("{provider} skipped: quota cool-down until {until}");
            return Err(AttemptOutcome::CoolingDown { until });
        }

        match adapter
            .invoke(&binding, &request.messages, &request.options)
            .await
        {
            ProviderOutcome::Text(text) if text.contains(NO_OPTIONS_SENTINEL) => {
                log::info!("{provider} reported no options");
                Err(AttemptOutcome::NoOptions)
            }
            ProviderOutcome::Text(text) if text.trim().is_empty() => Err(AttemptOutcome::Failed {
                reason: FailureReason::Empty.to_string(),
            }),
            ProviderOutcome::Text(text) => Ok(text),
            ProviderOutcome::Failed(reason) => {
                if let FailureReason::RateLimited { retry_after } = &reason {
                    let cooldown = retry_after.unwrap_or(self.default_cooldown);
                    let until = ctx.clock.now() + cooldown;
                    ctx.quota.mark_exhausted(provider, until);
                    log::info!("{provider} rate limited; cooling down until {until}");
                }
                Err(AttemptOutcome::Failed {
                    reason: reason.to_string(),
                })
            }
        }
    }
}
