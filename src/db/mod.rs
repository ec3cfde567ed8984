pub mod migrations;
pub mod queries;

use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::Connection;

use crate::models::{AssistantConfig, CallRecord};
use crate::services::config_resolver::ConfigStore;
use crate::services::session::finalize::CallRecordSink;
use crate::state::lock;

pub fn init_db(path: &str) -> anyhow::Result<Connection> {
    let conn = Connection::open(path).context("failed to open database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .context("failed to set database pragmas")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Assistant records and call history in one SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        Ok(Self::from_connection(init_db(path)?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn upsert_assistant(&self, config: &AssistantConfig) -> anyhow::Result<()> {
        queries::upsert_assistant(&lock(&self.conn), config)
    }

    pub fn call_record(&self, call_id: &str) -> anyhow::Result<Option<CallRecord>> {
        queries::get_call_record(&lock(&self.conn), call_id)
    }

    pub fn call_count(&self, assistant_id: &str) -> anyhow::Result<i64> {
        queries::count_calls_for_assistant(&lock(&self.conn), assistant_id)
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn assistant_by_id(&self, id: &str) -> anyhow::Result<Option<AssistantConfig>> {
        queries::get_assistant_by_id(&lock(&self.conn), id)
    }

    async fn assistant_by_phone_number(&self, number: &str) -> anyhow::Result<Option<AssistantConfig>> {
        queries::get_assistant_by_phone(&lock(&self.conn), number)
    }
}

#[async_trait]
impl CallRecordSink for SqliteStore {
    async fn save_call_record(&self, record: &CallRecord) -> anyhow::Result<()> {
        let id = queries::insert_call_record(&lock(&self.conn), record)
            .with_context(|| format!("failed to save call record {}", record.call_id))?;
        tracing::info!(call_id = %record.call_id, row_id = %id, "call record saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use super::*;
    use crate::models::{AnalysisResult, CallClass, EndReason, TranscriptItem};

    fn store() -> SqliteStore {
        SqliteStore::open(":memory:").unwrap()
    }

    fn record(call_id: &str) -> CallRecord {
        let now = Utc::now();
        CallRecord {
            call_id: call_id.to_string(),
            assistant_id: "a1".to_string(),
            user_id: Some("u1".to_string()),
            call_class: CallClass::Inbound,
            phone_number: Some("+15551230000".to_string()),
            participant_identity: Some("sip_+15551230000".to_string()),
            call_sid: Some("CA1".to_string()),
            start_time: now,
            end_time: now,
            duration_secs: 42,
            end_reason: EndReason::Hangup,
            transcript: vec![TranscriptItem::new("user", "hello")],
            analysis: AnalysisResult {
                call_outcome: "completed".to_string(),
                outcome_confidence: 0.3,
                outcome_reasoning: String::new(),
                outcome_key_points: vec![],
                outcome_sentiment: None,
                follow_up_required: false,
                follow_up_notes: None,
                call_summary: None,
                call_success: None,
                structured_data: BTreeMap::new(),
                analysis_timestamp: now,
            },
            transferred: false,
            appointments: vec![],
        }
    }

    #[tokio::test]
    async fn test_assistant_lookup_by_id_and_phone() {
        let store = store();
        let config = AssistantConfig::from_json(
            r#"{"id":"a1","name":"Front desk","phone_number":"+15551230000"}"#,
        )
        .unwrap();
        store.upsert_assistant(&config).unwrap();

        let by_id = store.assistant_by_id("a1").await.unwrap().unwrap();
        assert_eq!(by_id.name, "Front desk");

        let by_phone = store.assistant_by_phone_number("15551230000").await.unwrap();
        assert_eq!(by_phone.map(|c| c.id).as_deref(), Some("a1"));

        assert!(store.assistant_by_id("missing").await.unwrap().is_none());
        assert!(store
            .assistant_by_phone_number("+19990000000")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_config() {
        let store = store();
        store
            .upsert_assistant(&AssistantConfig::from_json(r#"{"id":"a1","name":"Old"}"#).unwrap())
            .unwrap();
        store
            .upsert_assistant(&AssistantConfig::from_json(r#"{"id":"a1","name":"New"}"#).unwrap())
            .unwrap();

        let config = store.assistant_by_id("a1").await.unwrap().unwrap();
        assert_eq!(config.name, "New");
    }

    #[tokio::test]
    async fn test_call_record_is_write_once() {
        let store = store();
        store.save_call_record(&record("room-1")).await.unwrap();
        assert!(store.save_call_record(&record("room-1")).await.is_err());

        let saved = store.call_record("room-1").unwrap().unwrap();
        assert_eq!(saved.duration_secs, 42);
        assert_eq!(saved.transcript.len(), 1);
        assert_eq!(store.call_count("a1").unwrap(), 1);
        assert!(store.call_record("room-2").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let conn = init_db(":memory:").unwrap();
        conn.execute(
            "INSERT INTO assistants (id, config) VALUES ('bad', 'not json')",
            [],
        )
        .unwrap();
        assert!(queries::get_assistant_by_id(&conn, "bad").is_err());
    }
}
