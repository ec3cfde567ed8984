use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::EndReason;
use crate::services::session::finalize::SessionEnd;
use crate::services::session::speak;
use crate::services::transport::ConversationTransport;

/// Rough playout time for a spoken goodbye: 0.1 s per character, at least 3 s
/// and at most 10 s.
pub fn end_message_wait(message: &str) -> Duration {
    let estimate = (message.chars().count() as f64 * 0.1).min(10.0);
    Duration::from_secs_f64(estimate.max(3.0))
}

/// Forced hangup once the configured call length elapses. Stopping the timer
/// cancels the task, so no hangup can fire after the call ended another way.
pub struct MaxDurationTimer {
    cancel: CancellationToken,
}

impl MaxDurationTimer {
    pub fn disabled() -> Self {
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self { cancel }
    }

    pub fn start(
        call_id: String,
        limit: Duration,
        end_message: Option<String>,
        transport: Arc<dyn ConversationTransport>,
        end: SessionEnd,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tracing::info!(call_id = %call_id, limit_secs = limit.as_secs(), "max duration timer started");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(call_id = %call_id, "max duration timer cancelled");
                }
                _ = enforce(&call_id, limit, end_message, transport, end) => {}
            }
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for MaxDurationTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn enforce(
    call_id: &str,
    limit: Duration,
    end_message: Option<String>,
    transport: Arc<dyn ConversationTransport>,
    end: SessionEnd,
) {
    tokio::time::sleep(limit).await;
    if !end.mark(EndReason::MaxDuration) {
        return;
    }
    tracing::warn!(call_id, limit_secs = limit.as_secs(), "max call duration reached");

    if let Some(message) = end_message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        speak(transport.as_ref(), message).await;
        tokio::time::sleep(end_message_wait(message)).await;
    }

    match transport.delete_room().await {
        Ok(()) => tracing::info!(call_id, "room deleted after max duration"),
        Err(e) => {
            tracing::error!(call_id, error = %e, "room delete failed, disconnecting");
            if let Err(e) = transport.disconnect().await {
                tracing::error!(call_id, error = %e, "disconnect after max duration failed");
            }
        }
    }
    end.end(EndReason::MaxDuration);
}
