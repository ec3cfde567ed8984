use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Immutable per-call snapshot of an assistant record, fetched once when the
/// session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub first_message: Option<String>,
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub transcriber: TranscriberSettings,
    #[serde(default)]
    pub limits: CallLimits,
    #[serde(default)]
    pub booking: Option<BookingCredentials>,
    #[serde(default)]
    pub transfer: TransferSettings,
    #[serde(default)]
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
}

fn default_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    OpenAi,
    Groq,
    Cerebras,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProviderKind,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    200
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtsProviderKind {
    #[default]
    OpenAi,
    ElevenLabs,
    Cartesia,
    Rime,
    Hume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default)]
    pub provider: TtsProviderKind,
    #[serde(default = "default_voice_model")]
    pub model: String,
    #[serde(default = "default_voice_name")]
    pub voice: String,
}

fn default_voice_model() -> String {
    "gpt-4o-mini-tts".to_string()
}

fn default_voice_name() -> String {
    "alloy".to_string()
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            provider: TtsProviderKind::default(),
            model: default_voice_model(),
            voice: default_voice_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SttProviderKind {
    #[default]
    Deepgram,
    Whisper,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriberSettings {
    #[serde(default)]
    pub provider: SttProviderKind,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLimits {
    /// Zero or negative disables the max-duration timer.
    #[serde(default = "default_max_call_minutes")]
    pub max_call_duration_minutes: f64,
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_secs: u64,
    #[serde(default)]
    pub idle_messages: Vec<String>,
    #[serde(default = "default_max_idle_messages")]
    pub max_idle_messages: u32,
    #[serde(default)]
    pub end_call_message: Option<String>,
}

fn default_max_call_minutes() -> f64 {
    30.0
}

fn default_silence_timeout() -> u64 {
    20
}

fn default_max_idle_messages() -> u32 {
    3
}

impl Default for CallLimits {
    fn default() -> Self {
        Self {
            max_call_duration_minutes: default_max_call_minutes(),
            silence_timeout_secs: default_silence_timeout(),
            idle_messages: Vec::new(),
            max_idle_messages: default_max_idle_messages(),
            end_call_message: None,
        }
    }
}

impl CallLimits {
    pub fn max_call_duration(&self) -> Option<Duration> {
        if !self.max_call_duration_minutes.is_finite() || self.max_call_duration_minutes <= 0.0 {
            return None;
        }
        let secs = (self.max_call_duration_minutes * 60.0) as u64;
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// How long the caller may stay silent before the runtime marks them away.
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookingProviderKind {
    #[default]
    CalCom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingCredentials {
    #[serde(default)]
    pub provider: BookingProviderKind,
    pub api_key: String,
    /// Accepts `123`, `"123"` or `"cal_123"`.
    pub event_type_id: serde_json::Value,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_slot_minutes() -> u32 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default = "default_country_code")]
    pub country_code: String,
    #[serde(default)]
    pub sentence: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

fn default_country_code() -> String {
    "+1".to_string()
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            phone_number: None,
            country_code: default_country_code(),
            sentence: None,
            condition: None,
        }
    }
}

impl TransferSettings {
    /// Destination in E.164 form, prefixed with the country code when the
    /// configured number has no leading `+`.
    pub fn destination(&self) -> Option<String> {
        let number = self.phone_number.as_deref()?.trim();
        if number.is_empty() {
            return None;
        }
        if number.starts_with('+') {
            Some(number.to_string())
        } else {
            Some(format!("{}{}", self.country_code.trim(), number))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredField {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_field_type", rename = "type")]
    pub field_type: String,
}

fn default_field_type() -> String {
    "string".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default)]
    pub summary_prompt: Option<String>,
    #[serde(default)]
    pub evaluation_prompt: Option<String>,
    #[serde(default)]
    pub structured_data_prompt: Option<String>,
    #[serde(default)]
    pub structured_data_fields: Vec<StructuredField>,
    #[serde(default = "default_summary_timeout")]
    pub summary_timeout_secs: u64,
    #[serde(default = "default_evaluation_timeout")]
    pub evaluation_timeout_secs: u64,
    #[serde(default = "default_structured_timeout")]
    pub structured_data_timeout_secs: u64,
}

fn default_summary_timeout() -> u64 {
    30
}

fn default_evaluation_timeout() -> u64 {
    15
}

fn default_structured_timeout() -> u64 {
    20
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            summary_prompt: None,
            evaluation_prompt: None,
            structured_data_prompt: None,
            structured_data_fields: Vec::new(),
            summary_timeout_secs: default_summary_timeout(),
            evaluation_timeout_secs: default_evaluation_timeout(),
            structured_data_timeout_secs: default_structured_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookSettings {
    #[serde(default)]
    pub url: Option<String>,
}

impl AssistantConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn first_message(&self) -> Option<&str> {
        self.first_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = AssistantConfig::from_json(r#"{"id":"a1"}"#).unwrap();
        assert_eq!(config.prompt, "You are a helpful assistant.");
        assert_eq!(config.limits.max_idle_messages, 3);
        assert_eq!(config.limits.silence_timeout_secs, 20);
        assert_eq!(config.analysis.summary_timeout_secs, 30);
        assert_eq!(config.analysis.evaluation_timeout_secs, 15);
        assert_eq!(config.analysis.structured_data_timeout_secs, 20);
        assert_eq!(config.transfer.country_code, "+1");
        assert_eq!(config.llm.provider, LlmProviderKind::OpenAi);
        assert!(config.booking.is_none());
        assert_eq!(
            config.limits.max_call_duration(),
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn test_nested_sections_parse() {
        let json = r#"{
            "id": "a2",
            "user_id": "u1",
            "llm": {"provider": "groq", "model": "llama3-8b-8192"},
            "limits": {"max_call_duration_minutes": 0.5, "idle_messages": ["Hello?"], "max_idle_messages": 2},
            "booking": {"api_key": "k", "event_type_id": "cal_42", "timezone": "Asia/Karachi"},
            "transfer": {"enabled": true, "phone_number": "5551234567"},
            "analysis": {"structured_data_fields": [{"name": "Budget", "type": "number"}]}
        }"#;
        let config = AssistantConfig::from_json(json).unwrap();
        assert_eq!(config.llm.provider, LlmProviderKind::Groq);
        assert_eq!(config.limits.max_call_duration(), Some(Duration::from_secs(30)));
        assert_eq!(config.limits.idle_messages.len(), 1);
        assert_eq!(config.limits.max_idle_messages, 2);
        let booking = config.booking.unwrap();
        assert_eq!(booking.timezone, "Asia/Karachi");
        assert_eq!(booking.slot_minutes, 30);
        assert_eq!(config.transfer.destination().as_deref(), Some("+15551234567"));
        assert_eq!(config.analysis.structured_data_fields[0].field_type, "number");
    }

    #[test]
    fn test_disabled_duration_limit() {
        let limits = CallLimits {
            max_call_duration_minutes: 0.0,
            ..CallLimits::default()
        };
        assert!(limits.max_call_duration().is_none());
    }

    #[test]
    fn test_transfer_destination_keeps_plus_prefix() {
        let transfer = TransferSettings {
            enabled: true,
            phone_number: Some(" +442071234567 ".to_string()),
            ..TransferSettings::default()
        };
        assert_eq!(transfer.destination().as_deref(), Some("+442071234567"));

        let blank = TransferSettings {
            phone_number: Some("  ".to_string()),
            ..TransferSettings::default()
        };
        assert!(blank.destination().is_none());
    }

    #[test]
    fn test_blank_first_message_is_none() {
        let config = AssistantConfig::from_json(r#"{"id":"a3","first_message":"   "}"#).unwrap();
        assert!(config.first_message().is_none());
    }
}
