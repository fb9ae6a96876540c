use r2d2_sqlite::rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

/// Row of the event log as shown by `answerhunter events`.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub ts: i64,
    pub level: String,
    pub code: Option<String>,
    pub module: String,
    pub message: String,
    pub data: Option<Value>,
}

/// Most recent events first.
pub fn recent_events(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<EventRecord>> {
    let mut stmt = conn.prepare(
        "SELECT ts, level, code, module, message, data FROM event_log ORDER BY ts DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        let data: Option<String> = row.get(5)?;
        Ok(EventRecord {
            ts: row.get(0)?,
            level: row.get(1)?,
            code: row.get(2)?,
            module: row.get(3)?,
            message: row.get(4)?,
            data: data.and_then(|d| serde_json::from_str(&d).ok()),
        })
    })?;
    rows.collect()
}
