//! Version 1 of the extension message API.
//!
//! Every message is a JSON object tagged by `action`. Handlers are thin:
//! they decode the payload, call into the [`AnswerEngine`] or the page
//! highlighter, and wrap the result in a `{success, ...}` envelope.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::ImageInput;
use crate::engine::AnswerEngine;
use crate::errors::AnswerHunterError;

/// Selectors for elements that commonly mark the correct answer on quiz and
/// exercise sites.
pub const ANSWER_SELECTORS: &[&str] = &[
    ".correct-answer",
    ".answer-correct",
    ".resposta-correta",
    ".alternativa-correta",
    ".gabarito",
    "[data-correct='true']",
    "[data-answer='correct']",
    "[class*='correct']",
];

/// Marks elements on the current page.
pub trait PageHighlighter: Send + Sync {
    fn highlight(&self, selectors: &[&str]);
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<AnswerEngine>,
    pub highlighter: Arc<dyn PageHighlighter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    Highlight,
    ExtractQuestions { page_text: String },
    Answer { question: String },
    AnswerAll { questions: Vec<String> },
    /// `image` is a base64 data URI.
    Transcribe { image: String },
    Search { query: String },
}

/// Decode and dispatch one message. Never fails: problems are reported in
/// the response envelope.
pub async fn handle_message(state: &ApiState, message: Value) -> Value {
    let message: InboundMessage = match serde_json::from_value(message) {
        Ok(message) => message,
        Err(err) => {
            log::warn!("rejected message: {err}");
            return error_response(&AnswerHunterError::InvalidMessage);
        }
    };

    match message {
        InboundMessage::Highlight => {
            state.highlighter.highlight(ANSWER_SELECTORS);
            json!({ "success": true })
        }
        InboundMessage::ExtractQuestions { page_text } => {
            let questions = state.engine.extract_questions(&page_text).await;
            json!({ "success": true, "questions": questions })
        }
        InboundMessage::Answer { question } => {
            let answer = state.engine.answer(&question).await;
            json!({ "success": true, "answer": answer })
        }
        InboundMessage::AnswerAll { questions } => {
            let answers = state.engine.answer_all(&questions).await;
            json!({ "success": true, "answers": answers })
        }
        InboundMessage::Transcribe { image } => match ImageInput::from_data_uri(&image) {
            Some(image) => {
                let text = state.engine.transcribe(&image).await;
                json!({ "success": true, "text": text })
            }
            None => error_response(&AnswerHunterError::InvalidImage),
        },
        InboundMessage::Search { query } => {
            let results = state.engine.search(&query).await;
            json!({ "success": true, "results": results })
        }
    }
}

fn error_response(err: &AnswerHunterError) -> Value {
    json!({
        "success": false,
        "code": err.code(),
        "error": err.to_string(),
        "explain": err.explain(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::providers::ProviderBinding;
    use crate::agents::{
        CallOptions, ChatMessage, ChatProvider, FallbackOrchestrator, ProviderKind,
        ProviderOutcome,
    };
    use crate::db::init_memory_db;
    use crate::search::SearchClient;
    use crate::settings::{keys, Settings};
    use async_trait::async_trait;
    use reqwest::Client;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHighlighter {
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl PageHighlighter for RecordingHighlighter {
        fn highlight(&self, selectors: &[&str]) {
            self.calls
                .lock()
                .unwrap()
                .push(selectors.iter().map(|s| s.to_string()).collect());
        }
    }

    struct FixedProvider(&'static str);

    #[async_trait]
    impl ChatProvider for FixedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Groq
        }

        async fn invoke(
            &self,
            _binding: &ProviderBinding,
            _messages: &[ChatMessage],
            _options: &CallOptions,
        ) -> ProviderOutcome {
            ProviderOutcome::Text(self.0.to_string())
        }
    }

    fn state(reply: &'static str) -> (ApiState, Arc<RecordingHighlighter>) {
        let settings = Settings::default().with(keys::GROQ_API_KEY, "gsk").unwrap();
        let engine = AnswerEngine::new(
            init_memory_db().unwrap(),
            Arc::new(settings),
            FallbackOrchestrator::new(vec![Arc::new(FixedProvider(reply)) as Arc<dyn ChatProvider>]),
            SearchClient::new(Client::new()),
        );
        let highlighter = Arc::new(RecordingHighlighter::default());
        (
            ApiState {
                engine: Arc::new(engine),
                highlighter: highlighter.clone(),
            },
            highlighter,
        )
    }

    #[test]
    fn decodes_camel_case_actions() {
        let msg: InboundMessage =
            serde_json::from_value(json!({ "action": "extractQuestions", "pageText": "p" }))
                .unwrap();
        assert_eq!(
            msg,
            InboundMessage::ExtractQuestions {
                page_text: "p".into()
            }
        );
        let msg: InboundMessage = serde_json::from_value(json!({ "action": "highlight" })).unwrap();
        assert_eq!(msg, InboundMessage::Highlight);
    }

    #[tokio::test]
    async fn highlight_marks_answer_selectors_and_succeeds() {
        let (state, highlighter) = state("unused");
        let response = handle_message(&state, json!({ "action": "highlight" })).await;
        assert_eq!(response, json!({ "success": true }));
        let calls = highlighter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&".correct-answer".to_string()));
    }

    #[tokio::test]
    async fn answer_all_returns_answers_in_order() {
        let (state, _) = state("B) Quito");
        let response = handle_message(
            &state,
            json!({ "action": "answerAll", "questions": ["Q1", "Q2"] }),
        )
        .await;
        assert_eq!(response["success"], true);
        assert_eq!(response["answers"], json!(["B) Quito", "B) Quito"]));
    }

    #[tokio::test]
    async fn sentinel_reply_surfaces_as_null() {
        let (state, _) = state("SEM_OPCOES");
        let response = handle_message(
            &state,
            json!({ "action": "extractQuestions", "pageText": "no quiz here" }),
        )
        .await;
        assert_eq!(response, json!({ "success": true, "questions": null }));
    }

    #[tokio::test]
    async fn unknown_action_and_bad_image_are_reported() {
        let (state, _) = state("unused");
        let response = handle_message(&state, json!({ "action": "explode" })).await;
        assert_eq!(response["success"], false);
        assert_eq!(response["code"], "MSG-1001");

        let response = handle_message(
            &state,
            json!({ "action": "transcribe", "image": "not-a-data-uri" }),
        )
        .await;
        assert_eq!(response["code"], "MSG-1002");
    }
}
