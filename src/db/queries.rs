use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::DbError;
use crate::models::{AssistantConfig, CallRecord};

// ── Assistants ──

fn parse_config(json: &str) -> Result<AssistantConfig, DbError> {
    Ok(serde_json::from_str(json)?)
}

pub fn get_assistant_by_id(conn: &Connection, id: &str) -> anyhow::Result<Option<AssistantConfig>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT config FROM assistants WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(json.as_deref().map(parse_config).transpose()?)
}

/// Matches the number as given or with its leading `+` toggled, since
/// providers disagree on whether DIDs carry the prefix.
pub fn get_assistant_by_phone(
    conn: &Connection,
    phone_number: &str,
) -> anyhow::Result<Option<AssistantConfig>> {
    let number = phone_number.trim();
    let alternate = match number.strip_prefix('+') {
        Some(bare) => bare.to_string(),
        None => format!("+{number}"),
    };

    let json: Option<String> = conn
        .query_row(
            "SELECT config FROM assistants WHERE phone_number = ?1 OR phone_number = ?2
             ORDER BY phone_number = ?1 DESC, updated_at DESC LIMIT 1",
            params![number, alternate],
            |row| row.get(0),
        )
        .optional()?;

    Ok(json.as_deref().map(parse_config).transpose()?)
}

pub fn upsert_assistant(conn: &Connection, config: &AssistantConfig) -> anyhow::Result<()> {
    let json = serde_json::to_string(config)?;
    conn.execute(
        "INSERT INTO assistants (id, phone_number, config, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(id) DO UPDATE SET
           phone_number = excluded.phone_number,
           config = excluded.config,
           updated_at = excluded.updated_at",
        params![config.id, config.phone_number, json],
    )?;
    Ok(())
}

// ── Call history ──

/// Records are write-once: a second insert for the same call id fails.
pub fn insert_call_record(conn: &Connection, record: &CallRecord) -> anyhow::Result<String> {
    let id = uuid::Uuid::new_v4().to_string();
    let json = serde_json::to_string(record)?;

    conn.execute(
        "INSERT INTO call_history (id, call_id, assistant_id, user_id, call_class, phone_number,
           participant_identity, call_sid, call_status, end_reason, start_time, end_time,
           duration_secs, transferred, booked, record)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            id,
            record.call_id,
            record.assistant_id,
            record.user_id,
            record.call_class.as_str(),
            record.phone_number,
            record.participant_identity,
            record.call_sid,
            record.call_status(),
            record.end_reason.as_str(),
            record.start_time.to_rfc3339(),
            record.end_time.to_rfc3339(),
            record.duration_secs as i64,
            record.transferred,
            record.booked(),
            json,
        ],
    )?;
    Ok(id)
}

pub fn get_call_record(conn: &Connection, call_id: &str) -> anyhow::Result<Option<CallRecord>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record FROM call_history WHERE call_id = ?1",
            params![call_id],
            |row| row.get(0),
        )
        .optional()?;

    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json).map_err(DbError::from)?)),
        None => Ok(None),
    }
}

pub fn count_calls_for_assistant(conn: &Connection, assistant_id: &str) -> anyhow::Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM call_history WHERE assistant_id = ?1",
        params![assistant_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
