//! Product-level entry point: extract questions from a page, answer them,
//! transcribe screenshots and run evidence searches.
//!
//! The engine owns the process-wide quota tracker and hands it, together
//! with a fresh settings snapshot and the clock, to the orchestrator on every
//! request. Each resolution is written to the event log with a prompt
//! fingerprint rather than the prompt itself.

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use uuid::Uuid;

use crate::agents::adapters::build_http_client;
use crate::agents::{
    AttemptOutcome, ChatMessage, Clock, FallbackOrchestrator, ImageInput, PromptRequest,
    QuotaTracker, Resolution, ResolveContext, SystemClock,
};
use crate::db::DbPool;
use crate::logging::log_event;
use crate::prompts;
use crate::search::{SearchClient, SearchHit, SearchQuery};
use crate::settings::{Settings, SettingsProvider};

pub struct AnswerEngine {
    pool: DbPool,
    settings: Arc<dyn SettingsProvider>,
    orchestrator: FallbackOrchestrator,
    search: SearchClient,
    quota: QuotaTracker,
    clock: Arc<dyn Clock>,
}

impl AnswerEngine {
    pub fn new(
        pool: DbPool,
        settings: Arc<dyn SettingsProvider>,
        orchestrator: FallbackOrchestrator,
        search: SearchClient,
    ) -> Self {
        Self {
            pool,
            settings,
            orchestrator,
            search,
            quota: QuotaTracker::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Engine talking to the real provider and search endpoints.
    pub fn http(pool: DbPool, settings: Arc<dyn SettingsProvider>) -> Result<Self> {
        let client = build_http_client()?;
        Ok(Self::new(
            pool,
            settings,
            FallbackOrchestrator::with_client(client.clone()),
            SearchClient::new(client),
        ))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    /// Current settings. A store that cannot be read behaves like an empty
    /// configuration: every provider is skipped for lack of a key.
    pub async fn settings(&self) -> Settings {
        let provider = self.settings.clone();
        match spawn_blocking(move || provider.snapshot()).await {
            Ok(Ok(settings)) => settings,
            Ok(Err(err)) => {
                log::warn!("settings unavailable: {err:#}");
                Settings::default()
            }
            Err(err) => {
                log::warn!("settings task failed: {err}");
                Settings::default()
            }
        }
    }

    /// Question statement and options found in `page_text`, or `None` when
    /// the page has none or no provider answered.
    pub async fn extract_questions(&self, page_text: &str) -> Option<String> {
        let settings = self.settings().await;
        let request = prompts::extraction_prompt(page_text);
        self.run(&settings, &request).await.text
    }

    /// Answer one question, using search snippets as evidence when a Serper
    /// key is configured.
    pub async fn answer(&self, question: &str) -> Option<String> {
        let settings = self.settings().await;
        let sources = if settings.serper_api_key().is_some() {
            self.search_with(&settings, question).await
        } else {
            Vec::new()
        };
        let request = prompts::answer_prompt(question, &sources);
        self.run(&settings, &request).await.text
    }

    /// Answers in input order. Requests run concurrently; each one still
    /// walks its own fallback chain sequentially.
    pub async fn answer_all(&self, questions: &[String]) -> Vec<Option<String>> {
        join_all(questions.iter().map(|question| self.answer(question))).await
    }

    /// Text found in `image`, or an empty string.
    pub async fn transcribe(&self, image: &ImageInput) -> String {
        let settings = self.settings().await;
        let request = prompts::ocr_prompt(image);
        self.run(&settings, &request).await.text.unwrap_or_default()
    }

    pub async fn search(&self, query: &str) -> Vec<SearchHit> {
        let settings = self.settings().await;
        self.search_with(&settings, query).await
    }

    async fn search_with(&self, settings: &Settings, query: &str) -> Vec<SearchHit> {
        match self
            .search
            .search(settings.serper_api_key(), &SearchQuery::new(query))
            .await
        {
            Ok(hits) => hits,
            Err(err) => {
                log::warn!("search failed: {err}");
                Vec::new()
            }
        }
    }

    async fn run(&self, settings: &Settings, request: &PromptRequest) -> Resolution {
        let ctx = ResolveContext {
            settings,
            quota: &self.quota,
            clock: self.clock.as_ref(),
        };
        let resolution = self.orchestrator.resolve(&ctx, request).await;
        self.record_resolution(request, &resolution).await;
        resolution
    }

    async fn record_resolution(&self, request: &PromptRequest, resolution: &Resolution) {
        let pool = self.pool.clone();
        let request_id = Uuid::new_v4().to_string();
        let fingerprint = prompt_fingerprint(&request.messages);
        let site = request.site;
        let resolution = resolution.clone();

        let written = spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            for attempt in &resolution.attempts {
                if attempt.outcome == AttemptOutcome::Answered {
                    continue;
                }
                log_event(
                    &conn,
                    "warn",
                    Some("AI-0201"),
                    "ai.fallback",
                    "AI provider did not answer",
                    Some("Trying the next provider"),
                    Some(json!({
                        "request_id": request_id,
                        "site": site,
                        "provider": attempt.provider,
                        "attempt": attempt.outcome,
                        "fingerprint": fingerprint,
                    })),
                )?;
            }

            match (resolution.answered_by(), resolution.text.as_deref()) {
                (Some(provider), Some(text)) => log_event(
                    &conn,
                    "info",
                    Some("AI-0200"),
                    "ai.fallback",
                    "AI request answered",
                    Some("Fallback chain resolved a provider"),
                    Some(json!({
                        "request_id": request_id,
                        "site": site,
                        "provider": provider,
                        "fingerprint": fingerprint,
                        "preview": text.chars().take(200).collect::<String>(),
                    })),
                )?,
                _ => log_event(
                    &conn,
                    "warn",
                    Some("AI-0202"),
                    "ai.fallback",
                    "No provider produced an answer",
                    Some("Every provider failed or was skipped"),
                    Some(json!({
                        "request_id": request_id,
                        "site": site,
                        "fingerprint": fingerprint,
                    })),
                )?,
            }
            Ok(())
        })
        .await;

        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("failed to write event log: {err:#}"),
            Err(err) => log::warn!("event log task failed: {err}"),
        }
    }
}

/// SHA-256 over the text of every message, hex encoded.
pub fn prompt_fingerprint(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(message.role.as_str().as_bytes());
        hasher.update(message.text().as_bytes());
        for image in message.images() {
            hasher.update(image.data.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::providers::ProviderBinding;
    use crate::agents::quota::testing::ManualClock;
    use crate::agents::{CallOptions, ChatProvider, FailureReason, ProviderKind, ProviderOutcome};
    use crate::db::init_memory_db;
    use crate::logging::recent_events;
    use crate::settings::keys;
    use async_trait::async_trait;
    use reqwest::Client;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Replies with the last user message, prefixed by the provider name.
    struct EchoProvider {
        kind: ProviderKind,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatProvider for EchoProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn invoke(
            &self,
            _binding: &ProviderBinding,
            messages: &[ChatMessage],
            _options: &CallOptions,
        ) -> ProviderOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let last = messages.last().map(ChatMessage::text).unwrap_or_default();
            ProviderOutcome::Text(format!("{}: {}", self.kind, last))
        }
    }

    struct DownProvider(ProviderKind);

    #[async_trait]
    impl ChatProvider for DownProvider {
        fn kind(&self) -> ProviderKind {
            self.0
        }

        async fn invoke(
            &self,
            _binding: &ProviderBinding,
            _messages: &[ChatMessage],
            _options: &CallOptions,
        ) -> ProviderOutcome {
            ProviderOutcome::Failed(FailureReason::Status(500))
        }
    }

    fn engine(
        providers: Vec<Arc<dyn ChatProvider>>,
        settings: Settings,
        search: SearchClient,
    ) -> AnswerEngine {
        let pool = init_memory_db().unwrap();
        AnswerEngine::new(
            pool,
            Arc::new(settings),
            FallbackOrchestrator::new(providers),
            search,
        )
    }

    fn groq_only() -> Settings {
        Settings::default().with(keys::GROQ_API_KEY, "gsk").unwrap()
    }

    #[tokio::test]
    async fn answer_all_keeps_input_order() {
        let groq = Arc::new(EchoProvider {
            kind: ProviderKind::Groq,
            calls: AtomicUsize::new(0),
        });
        let engine = engine(
            vec![groq.clone() as Arc<dyn ChatProvider>],
            groq_only(),
            SearchClient::new(Client::new()),
        );
        let questions = vec!["Q1?".to_string(), "Q2?".to_string(), "Q3?".to_string()];

        let answers = engine.answer_all(&questions).await;
        assert_eq!(answers.len(), 3);
        for (question, answer) in questions.iter().zip(&answers) {
            let answer = answer.as_deref().unwrap();
            assert!(answer.starts_with("groq: Question:"));
            assert!(answer.contains(question.as_str()));
        }
        assert_eq!(groq.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn answer_includes_search_snippets_when_serper_is_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic": [{ "title": "Quito", "snippet": "Quito é a capital", "link": "https://a.example" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = groq_only().with(keys::SERPER_API_KEY, "serper").unwrap();
        let engine = engine(
            vec![Arc::new(EchoProvider {
                kind: ProviderKind::Groq,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn ChatProvider>],
            settings,
            SearchClient::with_endpoint(Client::new(), server.uri()),
        );

        let answer = engine.answer("Qual a capital do Equador?").await.unwrap();
        assert!(answer.contains("[1] Quito - Quito é a capital"));
    }

    #[tokio::test]
    async fn search_without_key_degrades_to_no_hits() {
        let engine = engine(vec![], groq_only(), SearchClient::new(Client::new()));
        assert!(engine.search("anything").await.is_empty());
    }

    #[tokio::test]
    async fn failed_transcription_is_empty_and_logged() {
        let engine = engine(
            vec![Arc::new(DownProvider(ProviderKind::Groq)) as Arc<dyn ChatProvider>],
            groq_only(),
            SearchClient::new(Client::new()),
        );
        let image = ImageInput::from_bytes("image/png", b"png");

        assert_eq!(engine.transcribe(&image).await, "");

        let conn = engine.pool().get().unwrap();
        let events = recent_events(&conn, 10).unwrap();
        let codes: Vec<_> = events.iter().filter_map(|e| e.code.as_deref()).collect();
        assert!(codes.contains(&"AI-0202"));
        assert!(codes.contains(&"AI-0201"));
        let missing = events
            .iter()
            .filter(|e| e.code.as_deref() == Some("AI-0201"))
            .filter_map(|e| e.data.as_ref())
            .filter(|d| d["attempt"]["outcome"] == "missing_key")
            .count();
        assert_eq!(missing, 2);
    }

    #[tokio::test]
    async fn successful_extraction_logs_fingerprint_not_page_text() {
        let engine = engine(
            vec![Arc::new(EchoProvider {
                kind: ProviderKind::Groq,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn ChatProvider>],
            groq_only(),
            SearchClient::new(Client::new()),
        );
        let page = "Questão 1: quanto é 2+2? A) 3 B) 4 ".repeat(20);

        let extracted = engine.extract_questions(&page).await;
        assert!(extracted.is_some());

        let conn = engine.pool().get().unwrap();
        let events = recent_events(&conn, 10).unwrap();
        let answered = events
            .iter()
            .find(|e| e.code.as_deref() == Some("AI-0200"))
            .unwrap();
        let data = answered.data.as_ref().unwrap();
        assert_eq!(data["provider"], "groq");
        assert_eq!(data["site"], "text");
        assert_eq!(data["fingerprint"].as_str().unwrap().len(), 64);
        assert!(data["preview"].as_str().unwrap().chars().count() <= 200);
    }

    #[tokio::test]
    async fn quota_is_shared_across_requests() {
        let engine = engine(
            vec![Arc::new(EchoProvider {
                kind: ProviderKind::Groq,
                calls: AtomicUsize::new(0),
            }) as Arc<dyn ChatProvider>],
            groq_only(),
            SearchClient::new(Client::new()),
        );
        let until = time::OffsetDateTime::now_utc() + std::time::Duration::from_secs(3600);
        engine.quota().mark_exhausted(ProviderKind::Groq, until);
        assert_eq!(engine.answer("Q?").await, None);
    }

    struct ThrottledProvider;

    #[async_trait]
    impl ChatProvider for ThrottledProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Groq
        }

        async fn invoke(
            &self,
            _binding: &ProviderBinding,
            _messages: &[ChatMessage],
            _options: &CallOptions,
        ) -> ProviderOutcome {
            ProviderOutcome::Failed(FailureReason::RateLimited { retry_after: None })
        }
    }

    #[tokio::test]
    async fn cooldown_follows_the_injected_clock() {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-10 08:00 UTC)));
        let engine = engine(
            vec![Arc::new(ThrottledProvider) as Arc<dyn ChatProvider>],
            groq_only(),
            SearchClient::new(Client::new()),
        )
        .with_clock(clock.clone());

        assert_eq!(engine.answer("Q?").await, None);
        assert_eq!(
            engine.quota().exhausted_until(ProviderKind::Groq),
            Some(datetime!(2026-05-10 08:01 UTC))
        );

        clock.advance(std::time::Duration::from_secs(30));
        engine.answer("Q?").await;
        let conn = engine.pool().get().unwrap();
        let cooling = recent_events(&conn, 10)
            .unwrap()
            .iter()
            .filter_map(|e| e.data.clone())
            .filter(|d| d["attempt"]["outcome"] == "cooling_down")
            .count();
        assert_eq!(cooling, 1);
    }

    #[test]
    fn fingerprint_depends_on_content() {
        let a = prompt_fingerprint(&[ChatMessage::user("one")]);
        let b = prompt_fingerprint(&[ChatMessage::user("two")]);
        let c = prompt_fingerprint(&[ChatMessage::system("one")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, prompt_fingerprint(&[ChatMessage::user("one")]));
    }
}
