use std::time::Duration;

use crate::services::transport::MetricEvent;

/// Per-turn latency bookkeeping. A turn closes when the TTS metric arrives.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    end_of_utterance: Duration,
    llm: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnLatency {
    pub end_of_utterance: Duration,
    pub llm: Duration,
    pub tts: Duration,
}

impl TurnLatency {
    pub fn total(&self) -> Duration {
        self.end_of_utterance + self.llm + self.tts
    }
}

impl LatencyTracker {
    pub fn record(&mut self, call_id: &str, event: MetricEvent) -> Option<TurnLatency> {
        match event {
            MetricEvent::EndOfUtterance { delay } => {
                self.end_of_utterance = delay;
                None
            }
            MetricEvent::Llm { time_to_first_token } => {
                self.llm = time_to_first_token;
                None
            }
            MetricEvent::Tts { time_to_first_byte } => {
                let turn = TurnLatency {
                    end_of_utterance: self.end_of_utterance,
                    llm: self.llm,
                    tts: time_to_first_byte,
                };
                tracing::info!(
                    call_id,
                    eou_ms = turn.end_of_utterance.as_millis() as u64,
                    llm_ms = turn.llm.as_millis() as u64,
                    tts_ms = turn.tts.as_millis() as u64,
                    total_ms = turn.total().as_millis() as u64,
                    "turn latency"
                );
                Some(turn)
            }
        }
    }
}
