use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::models::{AssistantConfig, CallRecord, TranscriptItem};

#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn deliver(&self, url: &str, payload: &Value) -> anyhow::Result<()>;
}

pub struct HttpWebhook {
    client: reqwest::Client,
}

impl HttpWebhook {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpWebhook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebhookSink for HttpWebhook {
    async fn deliver(&self, url: &str, payload: &Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .context("failed to send webhook")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("webhook error ({status}): {body}");
        }
        Ok(())
    }
}

/// User turns joined into one line.
pub fn conversation_summary(transcript: &[TranscriptItem]) -> String {
    transcript
        .iter()
        .filter(|item| item.role == "user")
        .map(|item| item.content.trim())
        .filter(|c| !c.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn build_payload(config: &AssistantConfig, record: &CallRecord) -> Value {
    let (from, to) = match record.call_class.direction() {
        "outbound" => (config.phone_number.clone(), record.phone_number.clone()),
        _ => (record.phone_number.clone(), config.phone_number.clone()),
    };
    let contact = record.appointments.last();
    let structured = &record.analysis;

    json!({
        "assistant": {
            "id": config.id,
            "name": config.name,
        },
        "call": {
            "id": record.call_id,
            "from": from,
            "to": to,
            "duration": record.duration_secs,
            "direction": record.call_class.direction(),
            "status": record.call_status(),
            "end_reason": record.end_reason.as_str(),
            "start_time": record.start_time.to_rfc3339(),
            "end_time": record.end_time.to_rfc3339(),
            "participant_identity": record.participant_identity,
        },
        "conversation_summary": conversation_summary(&record.transcript),
        "transcript": record.transcript,
        "contact_info": {
            "name": contact.map(|a| a.name.clone()).or_else(|| structured.contact_name()),
            "email": contact.map(|a| a.email.clone()),
            "phone": contact.map(|a| a.phone.clone()),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_summary_uses_user_turns_only() {
        let transcript = vec![
            TranscriptItem::new("assistant", "Hi, how can I help?"),
            TranscriptItem::new("user", "I need a cleaning"),
            TranscriptItem::new("user", "  next week "),
        ];
        assert_eq!(conversation_summary(&transcript), "I need a cleaning next week");
        assert_eq!(conversation_summary(&[]), "");
    }
}
