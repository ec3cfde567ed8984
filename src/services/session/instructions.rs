use chrono::DateTime;
use chrono_tz::Tz;

use crate::models::AssistantConfig;

const KNOWLEDGE_SECTION: &str = "KNOWLEDGE BASE ACCESS:
You have access to a knowledge base with information about the company. You can use the following tools when needed:
- query_knowledge_base: Search for specific information
- get_detailed_information: Get comprehensive details about a topic

Only use the knowledge base tools when your instructions say so or when the user asks for information that needs a lookup. When you do, give complete answers and mention the source when available.";

const BOOKING_SECTION: &str = "BOOKING CAPABILITIES:
You can help users book appointments with these tools:
- list_slots_on_day: Show available slots for a day (10 by default, use max_options=20 to show more)
- choose_slot: Select a slot by time like '7:00pm' or by its number in the list
- set_name, set_email, set_phone, set_notes: Record the customer's details
- finalize_booking: Complete the booking once time slot, name, email and phone are all collected
- verify_booking: Check whether a slow booking went through
- start_new_booking: Start over for another appointment

BOOKING RULES:
- Only start booking when the user explicitly asks to book or schedule
- Having the caller's contact details is not a reason to start booking
- Do not call finalize_booking or confirm_details until slot, name, email and phone are all collected. Only call ONE of them.";

/// System instructions for one call, assembled from the assistant's settings.
pub fn build_instructions(
    config: &AssistantConfig,
    booking_now: Option<DateTime<Tz>>,
    force_first_message: bool,
) -> String {
    let mut out = config.prompt.trim().to_string();

    if let Some(now) = booking_now {
        let tz = now.timezone();
        out.push_str(&format!(
            "\n\nCONTEXT:\n- Current local time: {}\n- Timezone: {tz}\n- When the user says a date like '7th October', always interpret it as the next FUTURE occurrence in {tz}. Never call tools with past dates.",
            now.to_rfc3339()
        ));
    }

    let management = call_management_section(config);
    if !management.is_empty() {
        out.push_str("\n\nCALL MANAGEMENT:\n");
        out.push_str(&management);
    }

    let collection = data_collection_section(config);
    if !collection.is_empty() {
        out.push_str("\n\n");
        out.push_str(&collection);
    }

    if config.knowledge_base_id.is_some() {
        out.push_str("\n\n");
        out.push_str(KNOWLEDGE_SECTION);
    }
    if booking_now.is_some() {
        out.push_str("\n\n");
        out.push_str(BOOKING_SECTION);
    }

    if force_first_message {
        if let Some(first) = config.first_message() {
            out.push_str(&format!(
                "\n\nIMPORTANT: Start the conversation by saying exactly: \"{first}\" Do not repeat or modify this greeting."
            ));
        }
    }
    out
}

fn call_management_section(config: &AssistantConfig) -> String {
    let limits = &config.limits;
    let mut lines = Vec::new();

    if let Some(message) = limits.end_call_message.as_deref().filter(|m| !m.trim().is_empty()) {
        lines.push(format!("END_CALL_MESSAGE: When the call is ending, say exactly: '{message}'"));
    }

    if !limits.idle_messages.is_empty() {
        lines.push("IDLE_MESSAGE_HANDLING:".to_string());
        lines.push(format!(
            "- If the user is silent for {} seconds, use one of these idle messages:",
            limits.silence_timeout_secs
        ));
        for (i, message) in limits.idle_messages.iter().enumerate() {
            lines.push(format!("  {}. '{message}'", i + 1));
        }
        lines.push(format!("- Maximum idle messages to send: {}", limits.max_idle_messages));
        lines.push(format!(
            "- After {} idle messages, end the call politely",
            limits.max_idle_messages
        ));
    }

    if let Some(limit) = limits.max_call_duration() {
        let minutes = limit.as_secs_f64() / 60.0;
        lines.push(format!(
            "CALL_DURATION_LIMIT: This call will automatically end after {minutes} minutes"
        ));
    }

    let transfer = &config.transfer;
    if transfer.enabled {
        let condition = transfer
            .condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        if let Some((condition, destination)) = condition.zip(transfer.destination()) {
            lines.push(String::new());
            lines.push("CALL_TRANSFER_CONFIGURATION:".to_string());
            lines.push(format!("- Transfer condition: {condition}"));
            lines.push(format!("- Transfer phone number: {destination}"));
            if let Some(sentence) = transfer.sentence.as_deref().filter(|s| !s.trim().is_empty()) {
                lines.push(format!("- Before transferring, say: '{sentence}'"));
            }
            lines.push("- This is a COLD TRANSFER (no announcement to the receiving party)".to_string());
            lines.push("- Use the transfer_required() function when the transfer condition is detected".to_string());
        }
    }

    lines.join("\n")
}

fn data_collection_section(config: &AssistantConfig) -> String {
    let fields = &config.analysis.structured_data_fields;
    if fields.is_empty() {
        return String::new();
    }
    let mut lines = vec![
        "PRIORITY DATA COLLECTION:".to_string(),
        "You have access to collect_analysis_data(field_name, field_value, field_type).".to_string(),
        "After your first greeting, collect the following data from the user:".to_string(),
    ];
    lines.extend(
        fields
            .iter()
            .map(|f| format!("- {}: {} (type: {})", f.name, f.description, f.field_type)),
    );
    lines.push(
        "Ask naturally. Call collect_analysis_data silently whenever you have a value; it needs no response."
            .to_string(),
    );
    lines.join("\n")
}
