use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ResolveError;
use crate::models::{AssistantConfig, CallClass, RoutingInfo};

/// Where assistant records live.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn assistant_by_id(&self, id: &str) -> anyhow::Result<Option<AssistantConfig>>;
    async fn assistant_by_phone_number(&self, number: &str) -> anyhow::Result<Option<AssistantConfig>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    ById(String),
    ByPhoneNumber(String),
}

/// Picks the lookup for a call class from its routing metadata.
pub fn lookup_for(class: CallClass, routing: &RoutingInfo) -> Result<Lookup, ResolveError> {
    let room = routing.room_metadata();
    let job = routing.job_metadata();
    match class {
        CallClass::Web => room
            .first_of(&["assistantId", "assistant_id"])
            .or_else(|| job.first_of(&["assistantId", "assistant_id"]))
            .map(Lookup::ById)
            .ok_or(ResolveError::MissingAssistantId(class)),
        CallClass::Outbound => job
            .first_of(&["agentId", "assistant_id"])
            .map(Lookup::ById)
            .ok_or(ResolveError::MissingAssistantId(class)),
        CallClass::InboundWithAssistant => job
            .first_of(&["assistantId", "assistant_id"])
            .map(Lookup::ById)
            .ok_or(ResolveError::MissingAssistantId(class)),
        CallClass::Inbound => job
            .first_of(&["called_number", "to_number", "phoneNumber"])
            .or_else(|| routing.called_did_from_room())
            .map(Lookup::ByPhoneNumber)
            .ok_or(ResolveError::MissingPhoneNumber),
    }
}

pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        class: CallClass,
        routing: &RoutingInfo,
    ) -> Result<AssistantConfig, ResolveError> {
        let lookup = lookup_for(class, routing)?;
        tracing::info!(call_class = class.as_str(), ?lookup, "resolving assistant");

        let (found, key) = match &lookup {
            Lookup::ById(id) => (self.store.assistant_by_id(id).await?, id),
            Lookup::ByPhoneNumber(number) => {
                (self.store.assistant_by_phone_number(number).await?, number)
            }
        };

        found.ok_or_else(|| {
            tracing::warn!(key = %key, "no assistant found");
            ResolveError::NotFound(key.clone())
        })
    }
}
