//! Prompt builders for each call site.

use crate::agents::{CallOptions, CallSite, ChatMessage, ImageInput, PromptRequest};
use crate::search::SearchHit;

/// Vision completions shorter than this are greetings or refusals, not
/// transcriptions.
pub const MIN_TRANSCRIPTION_CHARS: usize = 20;

const MAX_PAGE_CHARS: usize = 12_000;

const EXTRACTION_PROMPT: &str = "You extract multiple-choice questions from raw web page text. \
Return only the question statement followed by its options, one per line, each prefixed with its letter (A), B), C) ...). \
Copy the wording exactly; do not answer the question and do not add commentary. \
If the text contains no answer options, reply with exactly SEM_OPCOES.";

const ANSWER_PROMPT: &str = "You are a careful tutor answering a multiple-choice question. \
Use the numbered search snippets as evidence when they are relevant and ignore them otherwise. \
Reply with the letter and text of the correct option on the first line, then one or two sentences explaining why.";

const OCR_PROMPT: &str = "You transcribe images of exam and exercise pages. \
Reproduce every visible question and option verbatim, preserving letters and line breaks. \
Do not greet, summarise or answer; output only the transcribed text.";

pub fn extraction_prompt(page_text: &str) -> PromptRequest {
    let page: String = page_text.trim().chars().take(MAX_PAGE_CHARS).collect();
    PromptRequest {
        site: CallSite::Text,
        messages: vec![
            ChatMessage::system(EXTRACTION_PROMPT),
            ChatMessage::user(format!("Page text:\n{page}")),
        ],
        options: CallOptions {
            temperature: 0.1,
            max_tokens: 1024,
            min_chars: None,
        },
    }
}

pub fn answer_prompt(question: &str, sources: &[SearchHit]) -> PromptRequest {
    let mut user = format!("Question:\n{}", question.trim());
    if !sources.is_empty() {
        user.push_str("\n\nSearch snippets:");
        for (idx, hit) in sources.iter().enumerate() {
            user.push_str(&format!(
                "\n[{}] {} - {} ({})",
                idx + 1,
                hit.title.trim(),
                hit.snippet.trim(),
                hit.link
            ));
        }
    }
    PromptRequest {
        site: CallSite::Text,
        messages: vec![ChatMessage::system(ANSWER_PROMPT), ChatMessage::user(user)],
        options: CallOptions {
            temperature: 0.2,
            max_tokens: 700,
            min_chars: None,
        },
    }
}

pub fn ocr_prompt(image: &ImageInput) -> PromptRequest {
    PromptRequest {
        site: CallSite::Vision,
        messages: vec![
            ChatMessage::system(OCR_PROMPT),
            ChatMessage::user_with_image(
                "Transcribe all text in this image.",
                image.clone(),
            ),
        ],
        options: CallOptions {
            temperature: 0.1,
            max_tokens: 2048,
            min_chars: Some(MIN_TRANSCRIPTION_CHARS),
        },
    }
}
