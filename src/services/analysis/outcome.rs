use serde::Deserialize;

use crate::models::TranscriptItem;
use crate::services::ai::json::extract_json;
use crate::services::ai::{ChatOptions, LlmProvider, Message};

pub const BOOKED_OUTCOME: &str = "Booked Appointment";

const SYSTEM_PROMPT: &str = r#"You classify the outcome of a phone call between a voice assistant and a caller.

Return ONLY valid JSON (no markdown, no explanation) with this exact structure:
{
  "outcome": "Booked Appointment|Qualified|Not Qualified|Call Back|Information Request|Spam|No Response|Dropped",
  "confidence": 0.0,
  "reasoning": "one or two sentences",
  "key_points": ["short bullet", "short bullet"],
  "sentiment": "positive|neutral|negative",
  "follow_up_required": false,
  "follow_up_notes": "what should happen next or null"
}

Outcome rules:
- "Booked Appointment": an appointment was actually confirmed during the call
- "Qualified": the caller is a real prospect but nothing was booked
- "Not Qualified": the caller is not a fit for the business
- "Call Back": the caller asked to be contacted later
- "Information Request": the caller only wanted information
- "Spam": robocall, telemarketing or abusive call
- "No Response": the caller never really engaged
- "Dropped": the call ended before anything meaningful happened
"#;

/// Model verdict on how the call went.
#[derive(Debug, Clone, Deserialize)]
pub struct OutcomeAnalysis {
    pub outcome: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub follow_up_required: bool,
    #[serde(default)]
    pub follow_up_notes: Option<String>,
}

pub async fn classify_outcome(
    llm: &dyn LlmProvider,
    transcript: &[TranscriptItem],
    duration_secs: u64,
) -> anyhow::Result<OutcomeAnalysis> {
    let prompt = format!(
        "Call duration: {duration_secs} seconds\n\nTranscript:\n{}",
        super::transcript_text(transcript)
    );
    let options = ChatOptions {
        max_tokens: 400,
        temperature: 0.1,
    };
    let response = llm
        .chat(SYSTEM_PROMPT, &[Message::user(prompt)], options)
        .await?;

    let mut analysis = extract_json::<OutcomeAnalysis>(&response)
        .filter(|a| !a.outcome.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("unparseable outcome reply"))?;
    analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    Ok(analysis)
}

const SPAM_KEYWORDS: [&str; 10] = [
    "robocall",
    "telemarketing",
    "scam",
    "fraud",
    "suspicious",
    "unwanted",
    "spam",
    "junk",
    "harassment",
    "threat",
];

/// Counts and keyword scores the heuristic classifier works from.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMetrics {
    pub duration_secs: u64,
    pub message_count: usize,
    pub user_message_count: usize,
    pub spam_score: f32,
}

impl CallMetrics {
    pub fn from_transcript(transcript: &[TranscriptItem], duration_secs: u64) -> Self {
        let content = transcript
            .iter()
            .map(|item| item.content.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            duration_secs,
            message_count: transcript.len(),
            user_message_count: transcript.iter().filter(|i| i.role == "user").count(),
            spam_score: keyword_score(&content, &SPAM_KEYWORDS),
        }
    }

    /// Any non-spam call of 15s or more with three or more turns counts as
    /// completed, whatever was discussed.
    pub fn status(&self) -> &'static str {
        if self.duration_secs < 5 {
            return "dropped";
        }
        if self.duration_secs < 15 && self.message_count < 2 {
            return "dropped";
        }
        if self.spam_score > 0.3 {
            return "spam";
        }
        if self.user_message_count <= 1 {
            return "no_response";
        }
        if self.message_count == 2 {
            return "dropped";
        }
        if self.duration_secs >= 15 && self.message_count >= 3 {
            return "completed";
        }
        "incomplete"
    }
}

fn keyword_score(content: &str, keywords: &[&str]) -> f32 {
    if content.is_empty() {
        return 0.0;
    }
    let hits = keywords.iter().filter(|k| content.contains(*k)).count();
    (hits as f32 / keywords.len() as f32).min(1.0)
}

/// Outcome used when classification is unavailable. A confirmed booking is
/// trusted over any transcript heuristic.
pub fn fallback_outcome(
    booked: bool,
    transcript: &[TranscriptItem],
    duration_secs: u64,
) -> OutcomeAnalysis {
    if booked {
        return OutcomeAnalysis {
            outcome: BOOKED_OUTCOME.to_string(),
            confidence: 0.9,
            reasoning: "Confirmed booking status from agent".to_string(),
            key_points: Vec::new(),
            sentiment: None,
            follow_up_required: false,
            follow_up_notes: None,
        };
    }

    let metrics = CallMetrics::from_transcript(transcript, duration_secs);
    OutcomeAnalysis {
        outcome: metrics.status().to_string(),
        confidence: 0.3,
        reasoning: "Fallback heuristic analysis (model unavailable)".to_string(),
        key_points: Vec::new(),
        sentiment: None,
        follow_up_required: false,
        follow_up_notes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turns(pairs: &[(&str, &str)]) -> Vec<TranscriptItem> {
        pairs
            .iter()
            .map(|(role, content)| TranscriptItem::new(role, content))
            .collect()
    }

    #[test]
    fn test_short_calls_are_dropped() {
        assert_eq!(CallMetrics::from_transcript(&[], 3).status(), "dropped");
        let one = turns(&[("assistant", "Hello?")]);
        assert_eq!(CallMetrics::from_transcript(&one, 10).status(), "dropped");
    }

    #[test]
    fn test_spam_keywords() {
        let t = turns(&[
            ("user", "this is a robocall about fraud"),
            ("user", "telemarketing scam offer"),
            ("assistant", "No thanks"),
        ]);
        let metrics = CallMetrics::from_transcript(&t, 40);
        assert!(metrics.spam_score > 0.3);
        assert_eq!(metrics.status(), "spam");
    }

    #[test]
    fn test_single_user_turn_is_no_response() {
        let t = turns(&[
            ("assistant", "Hi, how can I help?"),
            ("user", "hello"),
            ("assistant", "Are you there?"),
        ]);
        assert_eq!(CallMetrics::from_transcript(&t, 30).status(), "no_response");
    }

    #[test]
    fn test_engaged_call_completes() {
        let t = turns(&[
            ("assistant", "Hi, how can I help?"),
            ("user", "I want to book an appointment"),
            ("assistant", "Sure, which day?"),
            ("user", "Tomorrow please"),
        ]);
        assert_eq!(CallMetrics::from_transcript(&t, 45).status(), "completed");
    }

    #[test]
    fn test_completion_ignores_topic() {
        let t = turns(&[
            ("assistant", "Hi, how can I help?"),
            ("user", "Do you sell umbrellas"),
            ("assistant", "We do."),
            ("user", "Okay"),
        ]);
        assert_eq!(CallMetrics::from_transcript(&t, 20).status(), "completed");
        assert_eq!(CallMetrics::from_transcript(&t, 14).status(), "incomplete");
    }

    #[test]
    fn test_fallback_prefers_confirmed_booking() {
        let outcome = fallback_outcome(true, &[], 0);
        assert_eq!(outcome.outcome, BOOKED_OUTCOME);
        assert!((outcome.confidence - 0.9).abs() < f32::EPSILON);

        let outcome = fallback_outcome(false, &[], 0);
        assert_eq!(outcome.outcome, "dropped");
        assert!((outcome.confidence - 0.3).abs() < f32::EPSILON);
    }
}
