use std::collections::BTreeMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::models::{StructuredField, TranscriptItem};
use crate::services::ai::json::extract_json;
use crate::services::ai::{ChatOptions, LlmProvider, Message};

pub const CUSTOMER_NAME: &str = "Customer Name";
pub const EXTRACTION_FAILED: &str = "_ai_extraction_failed";

const DEFAULT_PROMPT: &str = "Extract the following information from the call transcript:";

static NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)greeting the user,?\s+([A-Z][a-z]+)",
        r"(?i)customer\s+([A-Z][a-z]+)",
        r"(?i)caller\s+([A-Z][a-z]+)",
        r"(?i)user\s+([A-Z][a-z]+)",
        r"(?i)client\s+([A-Z][a-z]+)",
        r"(?i)([A-Z][a-z]+)\s+mentioned",
        r"(?i)([A-Z][a-z]+)\s+requested",
        r"(?i)([A-Z][a-z]+)\s+asked",
        r"(?i)([A-Z][a-z]+)\s+provided",
        r"(?i)([A-Z][a-z]+)\s+confirmed",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Best-effort customer name from a generated summary. Only the first match of
/// each pattern is considered, and it must look like a capitalized word.
pub fn name_from_summary(summary: &str) -> Option<String> {
    NAME_PATTERNS.iter().find_map(|re| {
        let name = re.captures(summary)?.get(1)?.as_str().trim();
        let plausible = name.chars().count() >= 2
            && name.chars().all(char::is_alphabetic)
            && name.chars().next().is_some_and(char::is_uppercase);
        plausible.then(|| name.to_string())
    })
}

/// Entry recorded in structured data for a name lifted from the summary.
pub fn summary_name_entry(name: &str) -> Value {
    json!({
        "value": name,
        "type": "string",
        "timestamp": Utc::now().to_rfc3339(),
        "collection_method": "summary_extraction",
    })
}

pub fn failure_marker(error: &str, configured_fields: usize) -> Value {
    json!({
        "error": error,
        "timestamp": Utc::now().to_rfc3339(),
        "configured_fields_count": configured_fields,
    })
}

fn extraction_prompt(prompt: Option<&str>, fields: &[StructuredField]) -> String {
    let base = prompt
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_PROMPT);
    let lines = fields
        .iter()
        .map(|f| {
            if f.description.trim().is_empty() {
                format!("- {} ({})", f.name, f.field_type)
            } else {
                format!("- {} ({}): {}", f.name, f.field_type, f.description.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{base}\n\n{lines}\n\nReturn the data as a JSON object with the field names as keys.")
}

/// One model call asking for a flat JSON object keyed by field name.
pub async fn extract_fields(
    llm: &dyn LlmProvider,
    transcript: &[TranscriptItem],
    fields: &[StructuredField],
    prompt: Option<&str>,
) -> anyhow::Result<BTreeMap<String, Value>> {
    let text = super::transcript_text(transcript);
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let system = extraction_prompt(prompt, fields);
    let request = format!("Please extract the requested information from this call:\n\n{text}");
    let options = ChatOptions {
        max_tokens: 1000,
        temperature: 0.1,
    };
    let response = llm.chat(&system, &[Message::user(request)], options).await?;

    let object = extract_json::<Map<String, Value>>(&response)
        .ok_or_else(|| anyhow::anyhow!("model reply was not a JSON object"))?;
    Ok(object.into_iter().collect())
}
