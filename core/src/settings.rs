//! User configuration: the recognised keys, the read-only snapshot handed to
//! each request, and the SQLite store that persists it.
//!
//! Plain values live in `app_settings`; API keys live base64-encoded in
//! `ai_credentials` so they never show up in a casual `SELECT *` of the
//! settings table.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as B64_ENGINE;
use base64::Engine;
use r2d2_sqlite::rusqlite::{params, Connection};
use serde::Serialize;
use time::OffsetDateTime;

use crate::agents::ProviderKind;
use crate::db::DbPool;
use crate::errors::AnswerHunterError;
use crate::logging::log_event;

pub mod keys {
    pub const PRIMARY_PROVIDER: &str = "primaryProvider";
    pub const GROQ_API_KEY: &str = "groqApiKey";
    pub const GROQ_API_URL: &str = "groqApiUrl";
    pub const GROQ_MODEL_FAST: &str = "groqModelFast";
    pub const GROQ_MODEL_VISION: &str = "groqModelVision";
    pub const GEMINI_API_KEY: &str = "geminiApiKey";
    pub const GEMINI_MODEL: &str = "geminiModel";
    pub const OPENROUTER_API_KEY: &str = "openrouterApiKey";
    pub const OPENROUTER_MODEL_SMART: &str = "openrouterModelSmart";
    pub const SERPER_API_KEY: &str = "serperApiKey";
}

pub const SETTING_KEYS: &[&str] = &[
    keys::PRIMARY_PROVIDER,
    keys::GROQ_API_KEY,
    keys::GROQ_API_URL,
    keys::GROQ_MODEL_FAST,
    keys::GROQ_MODEL_VISION,
    keys::GEMINI_API_KEY,
    keys::GEMINI_MODEL,
    keys::OPENROUTER_API_KEY,
    keys::OPENROUTER_MODEL_SMART,
    keys::SERPER_API_KEY,
];

pub fn is_secret_key(key: &str) -> bool {
    key.ends_with("ApiKey")
}

/// Snapshot of the configuration. Only recognised keys with non-blank
/// values are ever stored.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set `key`; a blank value clears it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), AnswerHunterError> {
        if !SETTING_KEYS.contains(&key) {
            return Err(AnswerHunterError::UnknownSetting(key.to_string()));
        }
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), trimmed.to_string());
        }
        Ok(())
    }

    pub fn with(mut self, key: &str, value: &str) -> Result<Self, AnswerHunterError> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Configured primary provider, or `None` when unset or unrecognised.
    pub fn primary_provider(&self) -> Option<ProviderKind> {
        self.get(keys::PRIMARY_PROVIDER).and_then(ProviderKind::parse)
    }

    pub fn api_key(&self, provider: ProviderKind) -> Option<&str> {
        self.get(provider.api_key_setting())
    }

    pub fn serper_api_key(&self) -> Option<&str> {
        self.get(keys::SERPER_API_KEY)
    }

    /// Key/value pairs with secrets masked, for display.
    pub fn redacted(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(key, value)| {
                let shown = if is_secret_key(key) {
                    mask_secret(value)
                } else {
                    value.clone()
                };
                (key.clone(), shown)
            })
            .collect()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.redacted()).finish()
    }
}

fn mask_secret(value: &str) -> String {
    let tail: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if value.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}

/// Source of the per-request settings snapshot.
pub trait SettingsProvider: Send + Sync {
    fn snapshot(&self) -> Result<Settings>;
}

impl SettingsProvider for Settings {
    fn snapshot(&self) -> Result<Settings> {
        Ok(self.clone())
    }
}

/// Settings persisted in the SQLite database.
#[derive(Clone)]
pub struct SqliteSettingsStore {
    pool: DbPool,
}

impl SqliteSettingsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist one key and return the refreshed snapshot.
    pub fn set(&self, key: &str, value: &str) -> Result<Settings> {
        if !SETTING_KEYS.contains(&key) {
            return Err(AnswerHunterError::UnknownSetting(key.to_string()).into());
        }
        let conn = self.pool.get()?;
        write_setting(&conn, key, value.trim())?;
        let _ = log_event(
            &conn,
            "info",
            Some("CFG-0001"),
            "settings",
            "setting updated",
            Some("Configuration changed"),
            Some(serde_json::json!({ "key": key, "cleared": value.trim().is_empty() })),
        );
        read_settings(&conn)
    }
}

impl SettingsProvider for SqliteSettingsStore {
    fn snapshot(&self) -> Result<Settings> {
        let conn = self.pool.get()?;
        read_settings(&conn)
    }
}

fn read_settings(conn: &Connection) -> Result<Settings> {
    let mut settings = Settings::default();

    let mut stmt = conn.prepare("SELECT key, value FROM app_settings")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (key, value) = row?;
        // Keys written by older builds are ignored rather than rejected.
        let _ = settings.set(&key, &value);
    }

    let mut stmt = conn.prepare("SELECT key, secret FROM ai_credentials")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
    for row in rows {
        let (key, encoded) = row?;
        let decoded = B64_ENGINE
            .decode(encoded.as_bytes())
            .map_err(|_| anyhow!("Failed to decode stored credential"))?;
        let value = String::from_utf8(decoded)
            .map_err(|_| anyhow!("Stored credential was not valid UTF-8"))?;
        let _ = settings.set(&key, &value);
    }

    Ok(settings)
}

fn write_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    match (is_secret_key(key), value.is_empty()) {
        (true, true) => {
            conn.execute("DELETE FROM ai_credentials WHERE key = ?1", params![key])?;
        }
        (true, false) => {
            let encoded = B64_ENGINE.encode(value.as_bytes());
            conn.execute(
                "INSERT INTO ai_credentials (key, secret, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(key) DO UPDATE SET secret = excluded.secret, updated_at = excluded.updated_at",
                params![key, encoded, now],
            )?;
        }
        (false, true) => {
            conn.execute("DELETE FROM app_settings WHERE key = ?1", params![key])?;
        }
        (false, false) => {
            conn.execute(
                "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
        }
    }
    Ok(())
}
