use std::time::Duration;

use crate::models::CallClass;

/// Reasons a session ends without producing a call record, plus the fatal case.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("could not resolve assistant: {0}")]
    Resolve(#[from] ResolveError),

    #[error("user {user_id} has no minutes left")]
    QuotaExceeded { user_id: String },

    #[error("participant did not join within {0:?}")]
    ParticipantTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(anyhow::Error),
}

impl CallError {
    /// Abort-before-start errors end the session quietly; anything else is
    /// propagated to the hosting runtime.
    pub fn is_abort(&self) -> bool {
        !matches!(self, CallError::Transport(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no assistant id in metadata for {} call", .0.as_str())]
    MissingAssistantId(CallClass),

    #[error("no dialled number in routing metadata")]
    MissingPhoneNumber,

    #[error("assistant not found: {0}")]
    NotFound(String),

    #[error("config store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum AvailabilityError {
    #[error("availability lookup timed out")]
    Timeout,

    #[error("availability backend unreachable: {0}")]
    Connection(String),

    #[error("availability backend rate limited")]
    RateLimited,

    #[error("availability backend error: {0}")]
    ServerError(String),

    #[error("availability request rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReserveError {
    #[error("slot is no longer available")]
    SlotUnavailable,

    #[error("reservation timed out")]
    Timeout,

    #[error("booking backend unreachable: {0}")]
    Connection(String),

    #[error("booking backend rate limited")]
    RateLimited,

    #[error("booking backend error: {0}")]
    ServerError(String),

    #[error("reservation rejected: {0}")]
    Rejected(String),
}

impl ReserveError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReserveError::Timeout
                | ReserveError::Connection(_)
                | ReserveError::RateLimited
                | ReserveError::ServerError(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ReserveError::Timeout.is_transient());
        assert!(ReserveError::Connection("reset".into()).is_transient());
        assert!(ReserveError::RateLimited.is_transient());
        assert!(ReserveError::ServerError("502".into()).is_transient());
        assert!(!ReserveError::SlotUnavailable.is_transient());
        assert!(!ReserveError::Rejected("bad email".into()).is_transient());
    }

    #[test]
    fn test_abort_taxonomy() {
        assert!(CallError::QuotaExceeded { user_id: "u".into() }.is_abort());
        assert!(CallError::ParticipantTimeout(Duration::from_secs(35)).is_abort());
        assert!(CallError::Resolve(ResolveError::NotFound("a".into())).is_abort());
        assert!(!CallError::Transport(anyhow::anyhow!("boom")).is_abort());
    }

    #[test]
    fn test_resolve_error_message_names_class() {
        let err = ResolveError::MissingAssistantId(CallClass::Outbound);
        assert_eq!(err.to_string(), "no assistant id in metadata for outbound call");
    }
}
