pub mod agent;
pub mod finalize;
pub mod idle;
pub mod instructions;
pub mod metrics;
pub mod timer;

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use crate::errors::CallError;
use crate::models::routing::find_phone_number;
use crate::models::{AssistantConfig, CallClass, CallRecord, EndReason, Metadata, RoutingInfo};
use crate::services::booking::BookingStateMachine;
use crate::services::knowledge::KnowledgeTools;
use crate::services::transfer::TransferController;
use crate::services::transport::{ConversationTransport, Participant, SessionOptions, TransportEvent};
use crate::state::AppState;

use self::agent::CallAgent;
use self::finalize::{CallContext, Finalizer, SessionEnd};
use self::idle::{IdleAction, IdleCounter, IdlePolicy};
use self::metrics::LatencyTracker;
use self::timer::MaxDurationTimer;

/// Speaks `text`, falling back to asking the model to say it. Never fails.
pub async fn speak(transport: &dyn ConversationTransport, text: &str) {
    if let Err(e) = transport.say(text).await {
        tracing::warn!(error = %e, "say failed, falling back to generated reply");
        let instructions = format!("Say exactly this: '{text}'");
        if let Err(e) = transport.generate_reply(&instructions).await {
            tracing::error!(error = %e, "could not speak message");
        }
    }
}

/// Provider call id: participant SIP attribute, room metadata, participant
/// metadata, then job metadata.
pub fn call_sid(routing: &RoutingInfo, participant: &Participant) -> Option<String> {
    const KEYS: [&str; 3] = ["call_sid", "CallSid", "provider_id"];
    participant
        .attributes
        .get("sip.twilio.callSid")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| routing.room_metadata().first_of(&KEYS))
        .or_else(|| Metadata::parse(participant.metadata.as_deref()).first_of(&KEYS))
        .or_else(|| routing.job_call_sid())
}

/// The remote party's number, as far as routing and the participant reveal it.
pub fn caller_number(class: CallClass, routing: &RoutingInfo, participant: &Participant) -> Option<String> {
    let from_participant = || {
        participant
            .attributes
            .get("sip.phoneNumber")
            .cloned()
            .or_else(|| find_phone_number(&participant.identity))
    };
    match class {
        CallClass::Web => routing.caller_phone(),
        CallClass::Outbound => routing
            .job_metadata()
            .first_of(&["phone_number", "to_number", "phoneNumber"])
            .or_else(from_participant),
        CallClass::Inbound | CallClass::InboundWithAssistant => from_participant(),
    }
}

/// Entry point for one session. Returns `Ok(None)` when the call was
/// abandoned before the conversation started, `Err` only for fatal errors.
pub async fn handle_call(
    state: Arc<AppState>,
    routing: RoutingInfo,
    transport: Arc<dyn ConversationTransport>,
) -> anyhow::Result<Option<CallRecord>> {
    let call_id = routing.room_name.clone();
    match run(state, routing, transport).await {
        Ok(record) => {
            tracing::info!(call_id = %call_id, status = record.call_status(), "call completed");
            Ok(Some(record))
        }
        Err(e) if e.is_abort() => {
            tracing::warn!(call_id = %call_id, error = %e, "call aborted before start");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "call failed");
            Err(e.into())
        }
    }
}

async fn run(
    state: Arc<AppState>,
    routing: RoutingInfo,
    transport: Arc<dyn ConversationTransport>,
) -> Result<CallRecord, CallError> {
    let call_id = routing.room_name.clone();
    transport
        .connect()
        .await
        .context("failed to connect to room")
        .map_err(CallError::Transport)?;

    let call_class = routing.classify();
    tracing::info!(call_id = %call_id, call_class = call_class.as_str(), "call connected");
    let config = Arc::new(state.resolver.resolve(call_class, &routing).await?);

    if let Some(user_id) = config.user_id.as_deref() {
        let quota = state.usage.check_available(user_id).await;
        if !quota.available && !quota.unlimited {
            tracing::warn!(call_id = %call_id, user_id, remaining = quota.remaining_minutes, "no minutes left, rejecting call");
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(call_id = %call_id, error = %e, "disconnect after quota rejection failed");
            }
            return Err(CallError::QuotaExceeded {
                user_id: user_id.to_string(),
            });
        }
    }

    let end = SessionEnd::new();
    let agent = Arc::new(build_agent(&state, &config, &routing, &transport, &end));
    let idle = Arc::new(IdleCounter::new());

    let observer = tokio::spawn(observe_events(
        call_id.clone(),
        transport.subscribe(),
        IdlePolicy::from_limits(&config.limits),
        idle.clone(),
        transport.clone(),
        end.clone(),
    ));
    let session = Session {
        state,
        routing,
        transport,
        config,
        call_class,
        agent,
        idle,
        end,
    };
    let result = session.converse().await;
    observer.abort();
    result
}

struct Session {
    state: Arc<AppState>,
    routing: RoutingInfo,
    transport: Arc<dyn ConversationTransport>,
    config: Arc<AssistantConfig>,
    call_class: CallClass,
    agent: Arc<CallAgent>,
    idle: Arc<IdleCounter>,
    end: SessionEnd,
}

impl Session {
    async fn converse(self) -> Result<CallRecord, CallError> {
        let call_id = self.routing.room_name.clone();
        let options = SessionOptions::from_limits(&self.config.limits);
        tracing::debug!(call_id = %call_id, user_away_timeout = ?options.user_away_timeout, "starting conversation");
        self.transport
            .start(self.agent.clone(), options)
            .await
            .context("failed to start conversation")
            .map_err(CallError::Transport)?;

        if self.state.config.force_first_message {
            if let Some(first) = self.config.first_message() {
                speak(self.transport.as_ref(), first).await;
            }
        }

        let wait = self.state.config.participant_timeout();
        let participant = match tokio::time::timeout(wait, self.transport.wait_for_participant()).await {
            Ok(Ok(participant)) => participant,
            Ok(Err(e)) => return Err(CallError::Transport(e.context("participant never joined"))),
            Err(_) => {
                if let Err(e) = self.transport.disconnect().await {
                    tracing::warn!(call_id = %call_id, error = %e, "disconnect after participant timeout failed");
                }
                return Err(CallError::ParticipantTimeout(wait));
            }
        };
        tracing::info!(call_id = %call_id, participant = %participant.identity, "participant joined");

        let timer = match self.config.limits.max_call_duration() {
            Some(limit) => MaxDurationTimer::start(
                call_id.clone(),
                limit,
                self.config.limits.end_call_message.clone(),
                self.transport.clone(),
                self.end.clone(),
            ),
            None => MaxDurationTimer::disabled(),
        };

        let ctx = CallContext {
            call_id: call_id.clone(),
            config: self.config.clone(),
            call_class: self.call_class,
            phone_number: caller_number(self.call_class, &self.routing, &participant),
            participant_identity: Some(participant.identity.clone()),
            call_sid: call_sid(&self.routing, &participant),
            started_at: Utc::now(),
            started: Instant::now(),
        };
        let finalizer = Finalizer::new(
            ctx,
            self.state.clone(),
            self.transport.clone(),
            self.agent.clone(),
            timer,
            self.idle.clone(),
            self.end.clone(),
        );

        tokio::select! {
            _ = self.transport.closed() => {
                self.end.end(EndReason::Hangup);
            }
            _ = self.end.ended() => {}
        }
        if self.end.reason() == Some(EndReason::Transferred) {
            if let Err(e) = self.transport.disconnect().await {
                tracing::warn!(call_id = %call_id, error = %e, "disconnect after transfer failed");
            }
        }

        Ok(finalizer.finalize().await)
    }
}

fn build_agent(
    state: &AppState,
    config: &AssistantConfig,
    routing: &RoutingInfo,
    transport: &Arc<dyn ConversationTransport>,
    end: &SessionEnd,
) -> CallAgent {
    let call_id = routing.room_name.clone();
    let timezone = config
        .booking
        .as_ref()
        .and_then(|creds| creds.timezone.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC);
    let backend = config.booking.as_ref().and_then(|creds| {
        match state.calendars.build(creds) {
            Ok(backend) => Some(backend),
            Err(e) => {
                tracing::warn!(call_id = %call_id, error = %e, "calendar unavailable, booking disabled");
                None
            }
        }
    });
    let booking = BookingStateMachine::new(backend, timezone, state.booking_policy);

    let booking_now = booking
        .has_calendar()
        .then(|| Utc::now().with_timezone(&timezone));
    let instructions =
        instructions::build_instructions(config, booking_now, state.config.force_first_message);

    let knowledge = config
        .knowledge_base_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .zip(state.knowledge.clone())
        .map(|(id, backend)| KnowledgeTools::new(backend, id));

    let transfer = state.telephony.clone().map(|telephony| {
        Arc::new(TransferController::new(
            config.transfer.clone(),
            telephony,
            transport.clone(),
            routing.room_name.clone(),
            end.clone(),
        ))
    });

    tracing::info!(
        call_id = %call_id,
        calendar = booking.has_calendar(),
        knowledge = knowledge.is_some(),
        transfer = config.transfer.enabled,
        "agent built"
    );
    CallAgent::new(call_id, instructions, booking, knowledge, transfer)
}

/// Consumes transport events for the life of the call: latency metrics, the
/// idle policy and hangup detection. Speaking never blocks the loop.
async fn observe_events(
    call_id: String,
    mut events: broadcast::Receiver<TransportEvent>,
    policy: IdlePolicy,
    idle: Arc<IdleCounter>,
    transport: Arc<dyn ConversationTransport>,
    end: SessionEnd,
) {
    let mut latency = LatencyTracker::default();
    loop {
        let event = tokio::select! {
            _ = end.ended() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(TransportEvent::UserStateChanged { old, new }) => {
                match idle.on_transition(&policy, old, new) {
                    IdleAction::Speak(message) => {
                        tracing::info!(call_id = %call_id, count = idle.count(), "sending idle message");
                        let transport = transport.clone();
                        tokio::spawn(async move { speak(transport.as_ref(), &message).await });
                    }
                    IdleAction::Terminate => {
                        tracing::info!(call_id = %call_id, count = idle.count(), "max idle messages reached, ending call");
                        tokio::spawn(end_idle_call(call_id.clone(), transport.clone(), end.clone()));
                    }
                    IdleAction::Reset => tracing::debug!(call_id = %call_id, "caller back, idle count reset"),
                    IdleAction::Ignore => {}
                }
            }
            Ok(TransportEvent::Metrics(metric)) => {
                latency.record(&call_id, metric);
            }
            Ok(TransportEvent::ParticipantDisconnected { identity }) => {
                if !Participant::new(&identity).is_agent() {
                    tracing::info!(call_id = %call_id, participant = %identity, "participant left");
                    end.end(EndReason::Hangup);
                }
            }
            Ok(TransportEvent::Closed) => {
                end.end(EndReason::Hangup);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(call_id = %call_id, skipped, "event observer lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn end_idle_call(call_id: String, transport: Arc<dyn ConversationTransport>, end: SessionEnd) {
    if !end.mark(EndReason::IdleTimeout) {
        return;
    }
    if let Err(e) = transport.disconnect().await {
        tracing::error!(call_id = %call_id, error = %e, "idle disconnect failed");
    }
    end.end(EndReason::IdleTimeout);
}
