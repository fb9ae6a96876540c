//! Core library behind AnswerHunter: the AI provider fallback chain and the
//! services the extension surface calls into.
//!
//! Module map:
//! - [`agents`] holds the provider adapters, the quota tracker and the
//!   fallback orchestrator.
//! - [`api`] decodes extension-internal messages and dispatches them.
//! - [`db`] opens the SQLite database and applies migrations.
//! - [`engine`] is the product-level entry point (extract, answer, transcribe).
//! - [`errors`] keeps the error catalogue with human friendly metadata.
//! - [`logging`] writes structured diagnostics to the event log table.
//! - [`prompts`] builds the chat messages for each call site.
//! - [`search`] talks to the Serper web search API.
//! - [`settings`] reads and persists the user configuration.

pub mod agents;
pub mod api;
pub mod db;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod prompts;
pub mod search;
pub mod settings;
