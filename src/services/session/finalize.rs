use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::call_record::normalize_transcript;
use crate::models::{AssistantConfig, CallClass, CallRecord, EndReason};
use crate::services::session::agent::CallAgent;
use crate::services::session::idle::IdleCounter;
use crate::services::session::timer::MaxDurationTimer;
use crate::services::transport::ConversationTransport;
use crate::services::webhook::build_payload;
use crate::state::AppState;

const SAVE_TIMEOUT: Duration = Duration::from_secs(6);

/// Where finished call records go.
#[async_trait]
pub trait CallRecordSink: Send + Sync {
    async fn save_call_record(&self, record: &CallRecord) -> anyhow::Result<()>;
}

/// Shared end-of-call signal. The first reason recorded wins; every
/// termination source cancels the same token.
#[derive(Clone, Default)]
pub struct SessionEnd {
    token: CancellationToken,
    reason: Arc<OnceCell<EndReason>>,
}

impl SessionEnd {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the end reason without ending yet. Returns false when another
    /// path already claimed it.
    pub fn mark(&self, reason: EndReason) -> bool {
        self.reason.set(reason).is_ok()
    }

    pub fn end(&self, reason: EndReason) -> bool {
        let first = self.mark(reason);
        self.token.cancel();
        first
    }

    pub fn reason(&self) -> Option<EndReason> {
        self.reason.get().copied()
    }

    pub fn is_ended(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn ended(&self) {
        self.token.cancelled().await
    }
}

/// Identity of the call being finalized, fixed once the caller joined.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: String,
    pub config: Arc<AssistantConfig>,
    pub call_class: CallClass,
    pub phone_number: Option<String>,
    pub participant_identity: Option<String>,
    pub call_sid: Option<String>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

/// The shutdown path. `finalize` consumes the finalizer, so it runs at most
/// once whichever way the call ended. It never fails: every step past the
/// conversation is logged and skipped.
pub struct Finalizer {
    ctx: CallContext,
    state: Arc<AppState>,
    transport: Arc<dyn ConversationTransport>,
    agent: Arc<CallAgent>,
    timer: MaxDurationTimer,
    idle: Arc<IdleCounter>,
    end: SessionEnd,
}

impl Finalizer {
    pub fn new(
        ctx: CallContext,
        state: Arc<AppState>,
        transport: Arc<dyn ConversationTransport>,
        agent: Arc<CallAgent>,
        timer: MaxDurationTimer,
        idle: Arc<IdleCounter>,
        end: SessionEnd,
    ) -> Self {
        Self {
            ctx,
            state,
            transport,
            agent,
            timer,
            idle,
            end,
        }
    }

    pub async fn finalize(self) -> CallRecord {
        let call_id = self.ctx.call_id.as_str();

        self.timer.stop();
        self.idle.reset();
        // Whatever ended the call, nothing else may claim a reason now.
        self.end.end(EndReason::Hangup);
        let end_reason = self.end.reason().unwrap_or(EndReason::Hangup);

        let duration_secs = self.ctx.started.elapsed().as_secs();
        let transcript = normalize_transcript(&self.transport.final_transcript().await);
        tracing::info!(call_id, end_reason = end_reason.as_str(), duration_secs, items = transcript.len(), "finalizing call");

        let analysis = self
            .state
            .analysis
            .analyze(
                call_id,
                &transcript,
                duration_secs,
                &self.agent.snapshot(),
                &self.ctx.config.analysis,
            )
            .await;

        let record = CallRecord {
            call_id: self.ctx.call_id.clone(),
            assistant_id: self.ctx.config.id.clone(),
            user_id: self.ctx.config.user_id.clone(),
            call_class: self.ctx.call_class,
            phone_number: self.ctx.phone_number.clone(),
            participant_identity: self.ctx.participant_identity.clone(),
            call_sid: self.ctx.call_sid.clone(),
            start_time: self.ctx.started_at,
            end_time: self.ctx.started_at + chrono::Duration::seconds(duration_secs as i64),
            duration_secs,
            end_reason,
            transcript,
            analysis,
            transferred: end_reason == EndReason::Transferred || self.agent.transferred(),
            appointments: self.agent.booking().appointments(),
        };

        match tokio::time::timeout(SAVE_TIMEOUT, self.state.records.save_call_record(&record)).await {
            Ok(Ok(())) => tracing::info!(call_id, status = record.call_status(), "call record saved"),
            Ok(Err(e)) => tracing::error!(call_id, error = %e, "failed to save call record"),
            Err(_) => tracing::error!(call_id, timeout_secs = SAVE_TIMEOUT.as_secs(), "saving call record timed out"),
        }

        if let Some(user_id) = self.ctx.config.user_id.as_deref() {
            self.state.usage.deduct(user_id, duration_secs).await;
        }

        self.fire_webhook(&record);
        record
    }

    fn fire_webhook(&self, record: &CallRecord) {
        let Some(url) = self.ctx.config.webhook.url.clone().filter(|u| !u.trim().is_empty()) else {
            return;
        };
        let payload = build_payload(&self.ctx.config, record);
        let sink = self.state.webhook.clone();
        let call_id = self.ctx.call_id.clone();
        tokio::spawn(async move {
            match sink.deliver(&url, &payload).await {
                Ok(()) => tracing::info!(call_id = %call_id, "webhook delivered"),
                Err(e) => tracing::warn!(call_id = %call_id, error = %e, "webhook delivery failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let end = SessionEnd::new();
        assert!(!end.is_ended());
        assert!(end.mark(EndReason::MaxDuration));
        assert!(!end.is_ended());
        assert!(!end.end(EndReason::Hangup));
        assert!(end.is_ended());
        assert_eq!(end.reason(), Some(EndReason::MaxDuration));
    }

    #[tokio::test]
    async fn test_clones_share_the_signal() {
        let end = SessionEnd::new();
        let other = end.clone();
        let waiter = tokio::spawn(async move {
            other.ended().await;
            other.reason()
        });
        end.end(EndReason::IdleTimeout);
        assert_eq!(waiter.await.unwrap(), Some(EndReason::IdleTimeout));
    }
}
