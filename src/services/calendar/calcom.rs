use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use reqwest::StatusCode;
use serde_json::json;

use super::AvailabilityBackend;
use crate::errors::{AvailabilityError, ReserveError};
use crate::models::{ReservationRequest, Slot};

const API_BASE: &str = "https://api.cal.com/v2";
const SLOTS_API_VERSION: &str = "2024-09-04";
const BOOKINGS_API_VERSION: &str = "2024-08-13";

pub struct CalComBackend {
    api_key: String,
    event_type_id: u64,
    timezone: Tz,
    slot_minutes: i64,
    base_url: String,
    client: reqwest::Client,
}

impl CalComBackend {
    pub fn new(api_key: String, event_type_id: u64, timezone: Tz, slot_minutes: u32) -> Self {
        Self {
            api_key,
            event_type_id,
            timezone,
            slot_minutes: i64::from(slot_minutes.max(1)),
            base_url: API_BASE.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

/// Flattens the `{"data": {"2025-01-01": [{"start": ...}]}}` slot map.
pub fn parse_slots(body: &serde_json::Value, slot_minutes: i64) -> Vec<Slot> {
    let Some(days) = body["data"].as_object() else {
        return Vec::new();
    };
    let mut slots: Vec<Slot> = days
        .values()
        .filter_map(|entries| entries.as_array())
        .flatten()
        .filter_map(|entry| {
            let start = entry["start"].as_str().or_else(|| entry["time"].as_str())?;
            let start = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc);
            let end = entry["end"]
                .as_str()
                .and_then(|e| DateTime::parse_from_rfc3339(e).ok())
                .map(|e| e.with_timezone(&Utc))
                .unwrap_or(start + chrono::Duration::minutes(slot_minutes));
            Some(Slot { start, end })
        })
        .collect();
    slots.sort_by_key(|s| s.start);
    slots.dedup_by_key(|s| s.start);
    slots
}

fn availability_error(err: reqwest::Error) -> AvailabilityError {
    if err.is_timeout() {
        AvailabilityError::Timeout
    } else if err.is_connect() || err.is_request() {
        AvailabilityError::Connection(err.to_string())
    } else {
        AvailabilityError::ServerError(err.to_string())
    }
}

fn reserve_error(err: reqwest::Error) -> ReserveError {
    if err.is_timeout() {
        ReserveError::Timeout
    } else if err.is_connect() || err.is_request() {
        ReserveError::Connection(err.to_string())
    } else {
        ReserveError::ServerError(err.to_string())
    }
}

/// Maps a failed booking response to an explicit error kind.
pub fn classify_reserve_status(status: StatusCode, body: &serde_json::Value) -> ReserveError {
    let message = body["error"]["message"]
        .as_str()
        .or_else(|| body["message"].as_str())
        .unwrap_or_default()
        .to_string();
    match status {
        StatusCode::CONFLICT => ReserveError::SlotUnavailable,
        StatusCode::TOO_MANY_REQUESTS => ReserveError::RateLimited,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ReserveError::Timeout,
        s if s.is_server_error() => ReserveError::ServerError(format!("{s}: {message}")),
        _ if message.to_lowercase().contains("no available users") => ReserveError::SlotUnavailable,
        s => ReserveError::Rejected(format!("{s}: {message}")),
    }
}

#[async_trait]
impl AvailabilityBackend for CalComBackend {
    async fn list_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Slot>, AvailabilityError> {
        let resp = self
            .client
            .get(format!("{}/slots", self.base_url))
            .bearer_auth(&self.api_key)
            .header("cal-api-version", SLOTS_API_VERSION)
            .query(&[
                ("eventTypeId", self.event_type_id.to_string()),
                ("start", start.to_rfc3339()),
                ("end", end.to_rfc3339()),
                ("timeZone", self.timezone.name().to_string()),
            ])
            .send()
            .await
            .map_err(availability_error)?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(availability_error)?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AvailabilityError::RateLimited);
        }
        if status.is_server_error() {
            return Err(AvailabilityError::ServerError(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(AvailabilityError::Rejected(format!("{status}: {body}")));
        }

        let slots = parse_slots(&body, self.slot_minutes);
        tracing::debug!(count = slots.len(), %start, %end, "fetched Cal.com slots");
        Ok(slots)
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<Option<String>, ReserveError> {
        let mut body = json!({
            "start": request.slot.start.to_rfc3339(),
            "eventTypeId": self.event_type_id,
            "attendee": {
                "name": request.name,
                "email": request.email,
                "phoneNumber": request.phone,
                "timeZone": self.timezone.name(),
            },
        });
        if let Some(notes) = &request.notes {
            body["bookingFieldsResponses"] = json!({ "notes": notes });
        }

        let resp = self
            .client
            .post(format!("{}/bookings", self.base_url))
            .bearer_auth(&self.api_key)
            .header("cal-api-version", BOOKINGS_API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(reserve_error)?;

        let status = resp.status();
        let data: serde_json::Value = resp.json().await.map_err(reserve_error)?;

        if !status.is_success() {
            return Err(classify_reserve_status(status, &data));
        }

        let id = data["data"]["uid"]
            .as_str()
            .map(str::to_string)
            .or_else(|| data["data"]["id"].as_u64().map(|id| id.to_string()));
        Ok(id)
    }
}
