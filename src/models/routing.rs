use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Metadata the hosting runtime hands over when it dispatches a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub room_name: String,
    #[serde(default)]
    pub room_metadata: Option<String>,
    #[serde(default)]
    pub job_metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallClass {
    Inbound,
    InboundWithAssistant,
    Outbound,
    Web,
}

impl CallClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallClass::Inbound => "inbound",
            CallClass::InboundWithAssistant => "inbound_with_assistant",
            CallClass::Outbound => "outbound",
            CallClass::Web => "web",
        }
    }

    pub fn direction(&self) -> &'static str {
        match self {
            CallClass::Outbound => "outbound",
            CallClass::Web => "web",
            _ => "inbound",
        }
    }
}

/// Flat string view of a JSON metadata blob. Malformed or non-object metadata
/// reads as empty.
#[derive(Debug, Clone, Default)]
pub struct Metadata(HashMap<String, serde_json::Value>);

impl Metadata {
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|s| serde_json::from_str::<HashMap<String, serde_json::Value>>(s).ok())
            .map(Metadata)
            .unwrap_or_default()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// First non-empty value among `keys`.
    pub fn first_of(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get_str(k))
    }
}

impl RoutingInfo {
    pub fn room_metadata(&self) -> Metadata {
        Metadata::parse(self.room_metadata.as_deref())
    }

    pub fn job_metadata(&self) -> Metadata {
        Metadata::parse(self.job_metadata.as_deref())
    }

    /// Precedence: room-level metadata, then job-level metadata, then the
    /// room name prefix, then `Inbound`.
    pub fn classify(&self) -> CallClass {
        let room = self.room_metadata();
        if room.get_str("source").as_deref() == Some("web")
            || room.get_str("callType").as_deref() == Some("web")
            || room.first_of(&["assistantId", "assistant_id"]).is_some()
        {
            return CallClass::Web;
        }
        if room.get_str("source").as_deref() == Some("outbound") {
            return CallClass::Outbound;
        }

        let job = self.job_metadata();
        if job.get_str("source").as_deref() == Some("web") {
            return CallClass::Web;
        }
        if job.first_of(&["assistantId", "assistant_id"]).is_some() {
            return CallClass::InboundWithAssistant;
        }

        let name = self.room_name.to_lowercase();
        if name.starts_with("outbound") {
            CallClass::Outbound
        } else if name.starts_with("assistant") || name.starts_with("web") {
            CallClass::Web
        } else {
            CallClass::Inbound
        }
    }

    /// Caller number encoded in `assistant-..._+NUMBER` room names.
    pub fn caller_phone(&self) -> Option<String> {
        if !self.room_name.starts_with("assistant-") {
            return None;
        }
        plus_segment(&self.room_name)
    }

    /// Dialled number encoded in `inbound-..._+DID` room names.
    pub fn called_did_from_room(&self) -> Option<String> {
        if !self.room_name.starts_with("inbound-") {
            return None;
        }
        plus_segment(&self.room_name)
    }

    /// Provider call id from the job metadata (outbound dials carry it there).
    pub fn job_call_sid(&self) -> Option<String> {
        self.job_metadata()
            .first_of(&["call_sid", "CallSid", "callSid", "twilio_call_sid"])
    }
}

fn plus_segment(room_name: &str) -> Option<String> {
    room_name
        .split('_')
        .nth(1)
        .filter(|part| part.starts_with('+'))
        .map(str::to_string)
}

static PHONE_IN_TEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d{10,}").expect("static regex"));

/// Any phone-number-looking run of ten or more digits inside `text`.
pub fn find_phone_number(text: &str) -> Option<String> {
    PHONE_IN_TEXT.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routing(room: &str, room_meta: Option<&str>, job_meta: Option<&str>) -> RoutingInfo {
        RoutingInfo {
            room_name: room.to_string(),
            room_metadata: room_meta.map(str::to_string),
            job_metadata: job_meta.map(str::to_string),
        }
    }

    #[test]
    fn test_room_assistant_id_wins_over_job_metadata() {
        let info = routing(
            "outbound-123",
            Some(r#"{"assistantId":"a1"}"#),
            Some(r#"{"assistant_id":"a2"}"#),
        );
        assert_eq!(info.classify(), CallClass::Web);
    }

    #[test]
    fn test_room_source_outbound() {
        let info = routing("room-x", Some(r#"{"source":"outbound"}"#), None);
        assert_eq!(info.classify(), CallClass::Outbound);
    }

    #[test]
    fn test_job_assistant_id_is_inbound_with_assistant() {
        let info = routing("inbound-abc", None, Some(r#"{"assistantId":"a9"}"#));
        assert_eq!(info.classify(), CallClass::InboundWithAssistant);
    }

    #[test]
    fn test_room_name_patterns() {
        assert_eq!(routing("outbound-1", None, None).classify(), CallClass::Outbound);
        assert_eq!(routing("assistant-1_+15550001111", None, None).classify(), CallClass::Web);
        assert_eq!(routing("web-42", None, None).classify(), CallClass::Web);
        assert_eq!(routing("inbound-1", None, None).classify(), CallClass::Inbound);
        assert_eq!(routing("something-else", None, None).classify(), CallClass::Inbound);
    }

    #[test]
    fn test_malformed_metadata_is_ignored() {
        let info = routing("outbound-7", Some("not json"), Some("[1,2]"));
        assert_eq!(info.classify(), CallClass::Outbound);
    }

    #[test]
    fn test_phone_extraction_from_room_names() {
        let web = routing("assistant-a1_+923001234567_xyz", None, None);
        assert_eq!(web.caller_phone().as_deref(), Some("+923001234567"));
        assert!(web.called_did_from_room().is_none());

        let inbound = routing("inbound-x_+15551230000", None, None);
        assert_eq!(inbound.called_did_from_room().as_deref(), Some("+15551230000"));
        assert!(routing("inbound-x_15551230000", None, None)
            .called_did_from_room()
            .is_none());
    }

    #[test]
    fn test_job_call_sid() {
        let info = routing("outbound-1", None, Some(r#"{"twilio_call_sid":"CA123"}"#));
        assert_eq!(info.job_call_sid().as_deref(), Some("CA123"));
    }

    #[test]
    fn test_find_phone_number() {
        assert_eq!(find_phone_number("call-+15551234567-x").as_deref(), Some("+15551234567"));
        assert!(find_phone_number("room-12345").is_none());
    }
}
