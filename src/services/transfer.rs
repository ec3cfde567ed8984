use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::routing::find_phone_number;
use crate::models::{EndReason, TransferSettings};
use crate::services::session::finalize::SessionEnd;
use crate::services::transport::ConversationTransport;

const DEFAULT_TRANSFER_SENTENCE: &str = "I'm transferring you now. Please hold.";

/// SIP control plane that can move a participant to another number.
#[async_trait]
pub trait TelephonyControl: Send + Sync {
    async fn transfer_participant(
        &self,
        room_name: &str,
        participant_identity: &str,
        transfer_to: &str,
        play_dialtone: bool,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Transferred { sentence: String },
    Disabled,
    AlreadyRequested,
    NoDestination,
    NoParticipant,
    Failed,
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOutcome::Transferred { sentence } => write!(f, "{sentence}"),
            TransferOutcome::Disabled => write!(f, "Transfer is not configured for this assistant."),
            TransferOutcome::AlreadyRequested => write!(f, "Transfer is already being processed."),
            TransferOutcome::NoDestination => write!(f, "Transfer phone number is not configured."),
            TransferOutcome::NoParticipant => write!(
                f,
                "Unable to transfer: participant information not available. Transfer requires a SIP participant."
            ),
            TransferOutcome::Failed => write!(
                f,
                "I encountered an error while transferring your call. Please try again or contact support."
            ),
        }
    }
}

/// One-shot cold transfer. The latch is released only when a transfer fails.
pub struct TransferController {
    settings: TransferSettings,
    telephony: Arc<dyn TelephonyControl>,
    transport: Arc<dyn ConversationTransport>,
    room_name: String,
    end: SessionEnd,
    requested: AtomicBool,
}

impl TransferController {
    pub fn new(
        settings: TransferSettings,
        telephony: Arc<dyn TelephonyControl>,
        transport: Arc<dyn ConversationTransport>,
        room_name: String,
        end: SessionEnd,
    ) -> Self {
        Self {
            settings,
            telephony,
            transport,
            room_name,
            end,
            requested: AtomicBool::new(false),
        }
    }

    pub fn condition(&self) -> Option<&str> {
        self.settings.condition.as_deref()
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Caller to transfer: first non-agent remote participant, else the SIP
    /// identity implied by a phone number in the room name.
    fn participant_identity(&self) -> Option<String> {
        self.transport
            .remote_participants()
            .into_iter()
            .find(|p| !p.is_agent() && !p.identity.is_empty())
            .map(|p| p.identity)
            .or_else(|| find_phone_number(&self.room_name).map(|number| format!("sip_{number}")))
    }

    pub async fn maybe_transfer(&self, reason: Option<&str>) -> TransferOutcome {
        if !self.settings.enabled {
            tracing::warn!("transfer requested but not enabled");
            return TransferOutcome::Disabled;
        }
        let Some(destination) = self.settings.destination() else {
            tracing::error!("transfer requested but no phone number configured");
            return TransferOutcome::NoDestination;
        };
        let Some(identity) = self.participant_identity() else {
            tracing::error!(room = %self.room_name, "no participant to transfer");
            return TransferOutcome::NoParticipant;
        };
        if self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::info!("transfer already in progress");
            return TransferOutcome::AlreadyRequested;
        }

        let sentence = self
            .settings
            .sentence
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TRANSFER_SENTENCE)
            .to_string();
        let transfer_to = format!("tel:{destination}");
        tracing::info!(
            room = %self.room_name,
            participant = %identity,
            to = %transfer_to,
            reason = reason.unwrap_or("transfer condition met"),
            "initiating cold transfer"
        );

        if let Err(e) = self.transport.say(&sentence).await {
            tracing::warn!(error = %e, "could not speak transfer sentence");
        }

        match self
            .telephony
            .transfer_participant(&self.room_name, &identity, &transfer_to, false)
            .await
        {
            Ok(()) => {
                tracing::info!(participant = %identity, to = %transfer_to, "transfer succeeded");
                self.end.end(EndReason::Transferred);
                TransferOutcome::Transferred { sentence }
            }
            Err(e) => {
                tracing::error!(participant = %identity, to = %transfer_to, error = %e, "transfer failed");
                self.requested.store(false, Ordering::Release);
                TransferOutcome::Failed
            }
        }
    }
}
