use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use answerhunter_core::agents::ImageInput;
use answerhunter_core::api::v1::{self, ApiState, PageHighlighter};
use answerhunter_core::db::{init_db, init_memory_db};
use answerhunter_core::engine::AnswerEngine;
use answerhunter_core::logging::recent_events;
use answerhunter_core::settings::{SettingsProvider, SqliteSettingsStore, SETTING_KEYS};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;

const NO_ANSWER: &str = "No answer found.";

#[derive(Parser)]
#[command(name = "answerhunter", version, about = "Find answers to quiz questions with AI providers")]
struct Cli {
    /// Directory holding answerhunter.db.
    #[arg(long = "db", value_name = "DIR", env = "ANSWERHUNTER_DB", global = true)]
    db_dir: Option<PathBuf>,
    /// Use a throwaway in-memory database.
    #[arg(long, global = true)]
    ephemeral: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read or change the configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    #[command(flatten)]
    Engine(EngineCommand),
    /// Show recent event log entries.
    Events {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Commands that need the answer engine.
#[derive(Subcommand)]
enum EngineCommand {
    /// Extract the question and options from a page text file ('-' for stdin).
    Extract { file: PathBuf },
    /// Answer one question.
    Ask {
        #[arg(required = true)]
        question: Vec<String>,
    },
    /// Answer every non-empty line of a file ('-' for stdin).
    AskAll { file: PathBuf },
    /// Transcribe the text in an image file.
    Ocr { image: PathBuf },
    /// Run a web search.
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Dispatch a raw extension message, e.g. '{"action":"highlight"}'.
    Message { json: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print every configured key, secrets masked.
    List,
    /// Print the recognised keys.
    Keys,
    Get { key: String },
    Set { key: String, value: String },
    Unset { key: String },
}

/// There is no page in a terminal; report what would be marked.
struct ConsoleHighlighter;

impl PageHighlighter for ConsoleHighlighter {
    fn highlight(&self, selectors: &[&str]) {
        for selector in selectors {
            println!("highlight {selector}");
        }
    }
}

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "AnswerHunter", "AnswerHunter") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("AnswerHunter")
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("ANSWERHUNTER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let pool = if cli.ephemeral {
        init_memory_db()?
    } else {
        let dir = cli.db_dir.unwrap_or_else(workspace_dir);
        tracing::debug!(path = %dir.display(), "opening settings database");
        init_db(dir).context("failed to open the settings database")?
    };
    let store = SqliteSettingsStore::new(pool.clone());

    match cli.command {
        Command::Config { action } => run_config(&store, action),
        Command::Events { limit } => {
            let conn = pool.get()?;
            for event in recent_events(&conn, limit)? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Command::Engine(command) => {
            let engine = Arc::new(AnswerEngine::http(pool, Arc::new(store))?);
            run_engine(engine, command).await
        }
    }
}

fn run_config(store: &SqliteSettingsStore, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::List => {
            for (key, value) in store.snapshot()?.redacted() {
                println!("{key} = {value}");
            }
        }
        ConfigAction::Keys => {
            for key in SETTING_KEYS {
                println!("{key}");
            }
        }
        ConfigAction::Get { key } => {
            if !SETTING_KEYS.contains(&key.as_str()) {
                bail!("unknown setting '{key}'");
            }
            let settings = store.snapshot()?;
            match settings.redacted().get(&key) {
                Some(value) => println!("{value}"),
                None => println!("(unset)"),
            }
        }
        ConfigAction::Set { key, value } => {
            store.set(&key, &value)?;
            tracing::info!(key = %key, "setting updated");
        }
        ConfigAction::Unset { key } => {
            store.set(&key, "")?;
            tracing::info!(key = %key, "setting cleared");
        }
    }
    Ok(())
}

async fn run_engine(engine: Arc<AnswerEngine>, command: EngineCommand) -> Result<()> {
    match command {
        EngineCommand::Extract { file } => {
            let page = read_input(&file)?;
            print_or_none(engine.extract_questions(&page).await);
        }
        EngineCommand::Ask { question } => {
            print_or_none(engine.answer(&question.join(" ")).await);
        }
        EngineCommand::AskAll { file } => {
            let questions: Vec<String> = read_input(&file)?
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            let answers = engine.answer_all(&questions).await;
            for (question, answer) in questions.iter().zip(answers) {
                println!("Q: {question}");
                println!("A: {}\n", answer.as_deref().unwrap_or(NO_ANSWER));
            }
        }
        EngineCommand::Ocr { image } => {
            let image = load_image(&image)?;
            let text = engine.transcribe(&image).await;
            if text.is_empty() {
                eprintln!("{NO_ANSWER}");
            } else {
                println!("{text}");
            }
        }
        EngineCommand::Search { query } => {
            for hit in engine.search(&query.join(" ")).await {
                println!("{}\n  {}\n  {}", hit.title, hit.link, hit.snippet);
            }
        }
        EngineCommand::Message { json } => {
            let message: serde_json::Value =
                serde_json::from_str(&json).context("message is not valid JSON")?;
            let state = ApiState {
                engine,
                highlighter: Arc::new(ConsoleHighlighter),
            };
            let response = v1::handle_message(&state, message).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

fn print_or_none(text: Option<String>) {
    match text {
        Some(text) => println!("{text}"),
        None => eprintln!("{NO_ANSWER}"),
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_image(path: &Path) -> Result<ImageInput> {
    let mime = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => bail!("unsupported image type: {}", path.display()),
    };
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(ImageInput::from_bytes(mime, &bytes))
}
