use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::models::{CallLimits, RawTranscriptItem};
use crate::services::session::agent::CallAgent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Speaking,
    Listening,
    Away,
}

#[derive(Debug, Clone, Default)]
pub struct Participant {
    pub identity: String,
    pub attributes: HashMap<String, String>,
    pub metadata: Option<String>,
}

impl Participant {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            ..Self::default()
        }
    }

    pub fn is_agent(&self) -> bool {
        self.identity.starts_with("agent") || self.identity.starts_with("AI")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricEvent {
    EndOfUtterance { delay: Duration },
    Llm { time_to_first_token: Duration },
    Tts { time_to_first_byte: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    UserStateChanged { old: UserState, new: UserState },
    Metrics(MetricEvent),
    ParticipantDisconnected { identity: String },
    Closed,
}

/// Runtime settings handed over with the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Silence after which the runtime reports `UserState::Away`.
    pub user_away_timeout: Duration,
}

impl SessionOptions {
    pub fn from_limits(limits: &CallLimits) -> Self {
        Self {
            user_away_timeout: limits.silence_timeout(),
        }
    }
}

/// The real-time voice runtime one call runs on. Audio, STT, TTS and turn
/// taking all live behind this seam.
#[async_trait]
pub trait ConversationTransport: Send + Sync {
    async fn connect(&self) -> anyhow::Result<()>;

    /// Hands the agent to the runtime and begins the conversation loop.
    async fn start(&self, agent: Arc<CallAgent>, options: SessionOptions) -> anyhow::Result<()>;

    /// Speaks `text` and returns once playout finished.
    async fn say(&self, text: &str) -> anyhow::Result<()>;

    /// Asks the model to produce `text` as its next reply. Used when `say`
    /// is unavailable.
    async fn generate_reply(&self, instructions: &str) -> anyhow::Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    async fn wait_for_participant(&self) -> anyhow::Result<Participant>;

    fn remote_participants(&self) -> Vec<Participant>;

    async fn final_transcript(&self) -> Vec<RawTranscriptItem>;

    /// Tears the session down for every party.
    async fn delete_room(&self) -> anyhow::Result<()>;

    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Resolves once the runtime reports the conversation is over.
    async fn closed(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_identities() {
        assert!(Participant::new("agent-123").is_agent());
        assert!(Participant::new("AI_bot").is_agent());
        assert!(!Participant::new("sip_+15551234567").is_agent());
    }

    #[test]
    fn test_options_follow_silence_timeout() {
        let limits = CallLimits {
            silence_timeout_secs: 45,
            ..CallLimits::default()
        };
        assert_eq!(
            SessionOptions::from_limits(&limits).user_away_timeout,
            Duration::from_secs(45)
        );

        let zero = CallLimits {
            silence_timeout_secs: 0,
            ..CallLimits::default()
        };
        assert_eq!(
            SessionOptions::from_limits(&zero).user_away_timeout,
            Duration::from_secs(1)
        );
    }
}
