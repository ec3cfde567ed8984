use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::services::analysis::AgentSnapshot;
use crate::services::booking::contact::format_email;
use crate::services::booking::BookingStateMachine;
use crate::services::knowledge::KnowledgeTools;
use crate::services::transfer::{TransferController, TransferOutcome};
use crate::state::lock;

const DEFAULT_MAX_OPTIONS: usize = 10;

/// A raw tool invocation forwarded by the conversation runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: &str, arguments: Value) -> Self {
        Self {
            name: name.to_string(),
            arguments,
        }
    }

    fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    fn text(&self, key: &str) -> &str {
        self.str_arg(key).unwrap_or_default()
    }

    fn usize_arg(&self, key: &str) -> Option<usize> {
        match self.arguments.get(key)? {
            Value::Number(n) => n.as_u64().map(|n| n as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// The conversational agent for one call: its instructions plus every tool
/// the model may invoke.
pub struct CallAgent {
    call_id: String,
    instructions: String,
    booking: BookingStateMachine,
    knowledge: Option<KnowledgeTools>,
    transfer: Option<Arc<TransferController>>,
    analysis_data: Mutex<BTreeMap<String, Value>>,
}

impl CallAgent {
    pub fn new(
        call_id: String,
        instructions: String,
        booking: BookingStateMachine,
        knowledge: Option<KnowledgeTools>,
        transfer: Option<Arc<TransferController>>,
    ) -> Self {
        Self {
            call_id,
            instructions,
            booking,
            knowledge,
            transfer,
            analysis_data: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn booking(&self) -> &BookingStateMachine {
        &self.booking
    }

    pub fn transferred(&self) -> bool {
        self.transfer.as_ref().is_some_and(|t| t.is_requested())
    }

    pub fn analysis_data(&self) -> BTreeMap<String, Value> {
        lock(&self.analysis_data).clone()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            booked: !self.booking.appointments().is_empty() || self.booking.snapshot().booked,
            structured_data: self.analysis_data(),
        }
    }

    /// Runs one tool and returns the text the model should see.
    pub async fn invoke(&self, call: &ToolCall) -> String {
        tracing::info!(call_id = %self.call_id, tool = %call.name, "tool invoked");
        match call.name.as_str() {
            "query_knowledge_base" => self.query_knowledge_base(call.text("query")).await,
            "get_detailed_information" => self.get_detailed_information(call.text("topic")).await,
            "list_slots_on_day" => {
                let max = call.usize_arg("max_options").unwrap_or(DEFAULT_MAX_OPTIONS);
                self.booking
                    .list_slots_on_day(call.text("day"), max)
                    .await
                    .to_string()
            }
            "choose_slot" => self
                .booking
                .choose_slot(call.str_arg("option_id").or(call.str_arg("slot")).unwrap_or_default())
                .await
                .to_string(),
            "set_name" => text_result(self.booking.set_name(call.text("name"))),
            "set_email" => text_result(self.booking.set_email(call.text("email"))),
            "set_phone" => text_result(self.booking.set_phone(call.text("phone"))),
            "set_notes" => self.booking.set_notes(call.text("notes")),
            "collect_missing_info" => self.booking.collect_missing_info(),
            "auto_book_appointment" => self.auto_book().await,
            "confirm_details" | "confirm_details_yes" | "finalize_booking" => {
                self.booking.commit().await.to_string()
            }
            "confirm_details_no" => self.booking.decline_details(),
            "verify_booking" => self.booking.verify().await.to_string(),
            "start_new_booking" => self.booking.reset(),
            "transfer_required" => self.transfer_required(call.str_arg("reason")).await,
            "collect_analysis_data" => self.collect_analysis_data(
                call.text("field_name"),
                call.text("field_value"),
                call.str_arg("field_type").unwrap_or("string"),
            ),
            other => {
                tracing::warn!(call_id = %self.call_id, tool = other, "unknown tool");
                format!("Unknown tool: {other}")
            }
        }
    }

    pub async fn query_knowledge_base(&self, query: &str) -> String {
        match &self.knowledge {
            Some(tools) => tools.query(query).await,
            None => "No knowledge base is configured for this assistant.".to_string(),
        }
    }

    pub async fn get_detailed_information(&self, topic: &str) -> String {
        match &self.knowledge {
            Some(tools) => tools.detailed(topic).await,
            None => "No knowledge base is configured for this assistant.".to_string(),
        }
    }

    async fn auto_book(&self) -> String {
        let missing = self.booking.snapshot().missing_fields();
        if !missing.is_empty() {
            return format!(
                "I need to collect some information first: {}.",
                missing.join(", ")
            );
        }
        self.booking.commit().await.to_string()
    }

    pub async fn transfer_required(&self, reason: Option<&str>) -> String {
        match &self.transfer {
            Some(transfer) => transfer.maybe_transfer(reason).await.to_string(),
            None => TransferOutcome::Disabled.to_string(),
        }
    }

    /// Records a live-collected field. Name, email and phone also feed the
    /// booking when they validate.
    pub fn collect_analysis_data(&self, field_name: &str, value: &str, field_type: &str) -> String {
        let field_name = field_name.trim();
        let value = value.trim();
        if field_name.is_empty() || value.is_empty() {
            return "I need both the field name and value to collect this information.".to_string();
        }

        let stored = if field_name == "Email Address" {
            format_email(value)
        } else {
            value.to_string()
        };
        let entry = json!({
            "value": stored,
            "type": field_type,
            "timestamp": Utc::now().to_rfc3339(),
            "collection_method": "live",
        });
        let total = {
            let mut data = lock(&self.analysis_data);
            data.insert(field_name.to_string(), entry);
            data.len()
        };
        self.booking.absorb_collected_field(field_name, value);
        tracing::info!(call_id = %self.call_id, field = field_name, field_type, total, "analysis data collected");
        "okay".to_string()
    }
}

fn text_result<E: std::fmt::Display>(result: Result<String, E>) -> String {
    result.unwrap_or_else(|e| e.to_string())
}
