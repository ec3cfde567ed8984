use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::booking::Appointment;
use super::routing::CallClass;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptItem {
    pub role: String,
    pub content: String,
}

impl TranscriptItem {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// One raw entry as the transport reports it. Content may be split into parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTranscriptItem {
    pub role: String,
    pub content: Vec<String>,
}

/// Joins content parts and drops entries that end up empty.
pub fn normalize_transcript(raw: &[RawTranscriptItem]) -> Vec<TranscriptItem> {
    raw.iter()
        .filter_map(|item| {
            let content = item
                .content
                .iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            (!content.is_empty()).then(|| TranscriptItem {
                role: item.role.clone(),
                content,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Hangup,
    MaxDuration,
    IdleTimeout,
    Transferred,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::MaxDuration => "max_duration",
            EndReason::IdleTimeout => "idle_timeout",
            EndReason::Transferred => "transferred",
            EndReason::Error => "error",
        }
    }
}

/// Derived post-call data. Every key is always present; stages that did not
/// run or failed serialize as `null` / empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub call_outcome: String,
    pub outcome_confidence: f32,
    pub outcome_reasoning: String,
    pub outcome_key_points: Vec<String>,
    pub outcome_sentiment: Option<String>,
    pub follow_up_required: bool,
    pub follow_up_notes: Option<String>,
    pub call_summary: Option<String>,
    pub call_success: Option<bool>,
    pub structured_data: BTreeMap<String, serde_json::Value>,
    pub analysis_timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn success_evaluation(&self) -> Option<&'static str> {
        self.call_success
            .map(|ok| if ok { "SUCCESS" } else { "FAILED" })
    }

    /// Contact name from structured data, checking the usual key spellings.
    pub fn contact_name(&self) -> Option<String> {
        const KEYS: [&str; 6] = [
            "Customer Name",
            "name",
            "full_name",
            "contact_name",
            "customer_name",
            "client_name",
        ];
        KEYS.iter().find_map(|k| {
            let value = self.structured_data.get(*k)?;
            let text = value
                .get("value")
                .and_then(|v| v.as_str())
                .or_else(|| value.as_str())?;
            Some(text.to_string())
        })
    }
}

/// Write-once aggregate produced at shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub assistant_id: String,
    pub user_id: Option<String>,
    pub call_class: CallClass,
    pub phone_number: Option<String>,
    pub participant_identity: Option<String>,
    pub call_sid: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub end_reason: EndReason,
    pub transcript: Vec<TranscriptItem>,
    pub analysis: AnalysisResult,
    pub transferred: bool,
    pub appointments: Vec<Appointment>,
}

impl CallRecord {
    pub fn call_status(&self) -> &str {
        &self.analysis.call_outcome
    }

    pub fn booked(&self) -> bool {
        !self.appointments.is_empty()
    }
}
