pub mod extract;
pub mod outcome;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::models::{AnalysisResult, AnalysisSettings, TranscriptItem};
use crate::services::ai::{ChatOptions, LlmProvider, Message};

use self::extract::{CUSTOMER_NAME, EXTRACTION_FAILED};
use self::outcome::OutcomeAnalysis;

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(20);

const EMPTY_SUMMARY: &str = "No conversation content available for summary.";
const SUMMARY_UNAVAILABLE: &str = "Summary generation not available - no model configured.";
const SUMMARY_TIMED_OUT: &str = "Summary generation timed out.";

/// What the live agent knew when the call ended.
#[derive(Debug, Clone, Default)]
pub struct AgentSnapshot {
    pub booked: bool,
    pub structured_data: BTreeMap<String, Value>,
}

/// `role: content` lines, the form every analysis prompt consumes.
pub fn transcript_text(transcript: &[TranscriptItem]) -> String {
    transcript
        .iter()
        .map(|item| format!("{}: {}\n", item.role, item.content))
        .collect()
}

fn clamp_secs(configured: u64, min: u64, max: u64) -> Duration {
    Duration::from_secs(configured.clamp(min, max))
}

/// Post-call analysis. Every stage is bounded and degrades on its own, so
/// `analyze` always produces a complete result.
#[derive(Clone)]
pub struct AnalysisPipeline {
    llm: Option<Arc<dyn LlmProvider>>,
}

impl AnalysisPipeline {
    pub fn new(llm: Option<Arc<dyn LlmProvider>>) -> Self {
        Self { llm }
    }

    pub async fn analyze(
        &self,
        call_id: &str,
        transcript: &[TranscriptItem],
        duration_secs: u64,
        agent: &AgentSnapshot,
        settings: &AnalysisSettings,
    ) -> AnalysisResult {
        let outcome = self.outcome(call_id, transcript, duration_secs, agent).await;

        let call_summary = match settings.summary_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => Some(
                self.summary(call_id, transcript, prompt, settings.summary_timeout_secs)
                    .await,
            ),
            _ => None,
        };

        let call_success = match settings.evaluation_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => Some(
                self.evaluate(call_id, transcript, prompt, settings.evaluation_timeout_secs)
                    .await,
            ),
            _ => None,
        };

        let structured_data = self
            .structured_data(call_id, transcript, call_summary.as_deref(), agent, settings)
            .await;

        tracing::info!(
            call_id,
            outcome = %outcome.outcome,
            confidence = outcome.confidence,
            summary = call_summary.is_some(),
            success = ?call_success,
            fields = structured_data.len(),
            "post-call analysis complete"
        );

        AnalysisResult {
            call_outcome: outcome.outcome,
            outcome_confidence: outcome.confidence,
            outcome_reasoning: outcome.reasoning,
            outcome_key_points: outcome.key_points,
            outcome_sentiment: outcome.sentiment,
            follow_up_required: outcome.follow_up_required,
            follow_up_notes: outcome.follow_up_notes,
            call_summary,
            call_success,
            structured_data,
            analysis_timestamp: Utc::now(),
        }
    }

    async fn outcome(
        &self,
        call_id: &str,
        transcript: &[TranscriptItem],
        duration_secs: u64,
        agent: &AgentSnapshot,
    ) -> OutcomeAnalysis {
        let fallback = || outcome::fallback_outcome(agent.booked, transcript, duration_secs);
        let Some(llm) = self.llm.as_deref() else {
            return fallback();
        };
        if transcript.is_empty() {
            return fallback();
        }

        let call = outcome::classify_outcome(llm, transcript, duration_secs);
        match tokio::time::timeout(OUTCOME_TIMEOUT, call).await {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                tracing::warn!(call_id, error = %e, "outcome classification failed, using fallback");
                fallback()
            }
            Err(_) => {
                tracing::warn!(call_id, "outcome classification timed out, using fallback");
                fallback()
            }
        }
    }

    async fn summary(
        &self,
        call_id: &str,
        transcript: &[TranscriptItem],
        prompt: &str,
        timeout_secs: u64,
    ) -> String {
        let text = transcript_text(transcript);
        if text.trim().is_empty() {
            return EMPTY_SUMMARY.to_string();
        }
        let Some(llm) = self.llm.as_deref() else {
            return SUMMARY_UNAVAILABLE.to_string();
        };

        let messages = [Message::user(format!("Please summarize this call:\n\n{text}"))];
        let options = ChatOptions {
            max_tokens: 500,
            temperature: 0.3,
        };
        let deadline = clamp_secs(timeout_secs, 20, 60);
        match tokio::time::timeout(deadline, llm.chat(prompt, &messages, options)).await {
            Ok(Ok(summary)) => summary.trim().to_string(),
            Ok(Err(e)) => {
                tracing::warn!(call_id, error = %e, "summary generation failed");
                format!("Summary generation failed: {e}")
            }
            Err(_) => {
                tracing::warn!(call_id, timeout_secs = deadline.as_secs(), "summary generation timed out");
                SUMMARY_TIMED_OUT.to_string()
            }
        }
    }

    async fn evaluate(
        &self,
        call_id: &str,
        transcript: &[TranscriptItem],
        prompt: &str,
        timeout_secs: u64,
    ) -> bool {
        let text = transcript_text(transcript);
        if text.trim().is_empty() {
            return false;
        }
        let Some(llm) = self.llm.as_deref() else {
            return false;
        };

        let messages = [Message::user(format!(
            "Please evaluate this call:\n\n{text}\n\nWas this call successful? Answer only 'YES' or 'NO'."
        ))];
        let options = ChatOptions {
            max_tokens: 10,
            temperature: 0.1,
        };
        let deadline = clamp_secs(timeout_secs, 10, 45);
        match tokio::time::timeout(deadline, llm.chat(prompt, &messages, options)).await {
            Ok(Ok(answer)) => answer.trim().to_uppercase() == "YES",
            Ok(Err(e)) => {
                tracing::warn!(call_id, error = %e, "success evaluation failed");
                false
            }
            Err(_) => {
                tracing::warn!(call_id, "success evaluation timed out");
                false
            }
        }
    }

    /// Live agent data wins over anything the model extracts.
    async fn structured_data(
        &self,
        call_id: &str,
        transcript: &[TranscriptItem],
        summary: Option<&str>,
        agent: &AgentSnapshot,
        settings: &AnalysisSettings,
    ) -> BTreeMap<String, Value> {
        let mut live = agent.structured_data.clone();
        if !live.contains_key(CUSTOMER_NAME) {
            if let Some(name) = summary.and_then(extract::name_from_summary) {
                tracing::debug!(call_id, "customer name taken from summary");
                live.insert(CUSTOMER_NAME.to_string(), extract::summary_name_entry(&name));
            }
        }

        let fields = &settings.structured_data_fields;
        if fields.is_empty() {
            return live;
        }

        let extracted = match self.llm.as_deref() {
            Some(llm) => {
                let deadline = clamp_secs(settings.structured_data_timeout_secs, 15, 60);
                let call = extract::extract_fields(
                    llm,
                    transcript,
                    fields,
                    settings.structured_data_prompt.as_deref(),
                );
                match tokio::time::timeout(deadline, call).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("timed out after {}s", deadline.as_secs())),
                }
            }
            None => Err("no model configured".to_string()),
        };

        match extracted {
            Ok(mut merged) => {
                merged.extend(live);
                merged
            }
            Err(error) => {
                tracing::error!(call_id, error = %error, fields = fields.len(), "structured data extraction failed");
                live.insert(
                    EXTRACTION_FAILED.to_string(),
                    extract::failure_marker(&error, fields.len()),
                );
                live
            }
        }
    }
}
