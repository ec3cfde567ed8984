pub mod calcom;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::{AvailabilityError, ReserveError};
use crate::models::{BookingCredentials, BookingProviderKind, ReservationRequest, Slot};

use self::calcom::CalComBackend;

/// The external calendar a booking flow lists slots from and reserves into.
#[async_trait]
pub trait AvailabilityBackend: Send + Sync {
    async fn list_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Slot>, AvailabilityError>;

    /// Returns the backend's appointment id when it reports one.
    async fn reserve(&self, request: &ReservationRequest) -> Result<Option<String>, ReserveError>;
}

/// Accepts `123`, `"123"` and `"cal_123_suffix"`.
pub fn normalize_event_type_id(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64)),
        serde_json::Value::String(s) => {
            let cleaned = s.trim();
            let numeric = match cleaned.strip_prefix("cal_") {
                Some(rest) => rest.split('_').next().unwrap_or_default(),
                None => cleaned,
            };
            numeric.parse().ok()
        }
        _ => None,
    }
}

/// Builds the availability backend an assistant's booking credentials point at.
pub trait CalendarFactory: Send + Sync {
    fn build(&self, credentials: &BookingCredentials) -> anyhow::Result<Arc<dyn AvailabilityBackend>>;
}

/// Provider registry keyed by [`BookingProviderKind`].
pub struct CalendarRegistry;

impl CalendarFactory for CalendarRegistry {
    fn build(&self, credentials: &BookingCredentials) -> anyhow::Result<Arc<dyn AvailabilityBackend>> {
        anyhow::ensure!(!credentials.api_key.trim().is_empty(), "calendar api key is empty");
        let event_type_id = normalize_event_type_id(&credentials.event_type_id).ok_or_else(|| {
            anyhow::anyhow!("invalid calendar event type id: {}", credentials.event_type_id)
        })?;
        let timezone: chrono_tz::Tz = credentials
            .timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown calendar timezone: {}", credentials.timezone))?;

        match credentials.provider {
            BookingProviderKind::CalCom => {
                tracing::info!(event_type_id, timezone = %timezone, "using Cal.com calendar");
                Ok(Arc::new(CalComBackend::new(
                    credentials.api_key.clone(),
                    event_type_id,
                    timezone,
                    credentials.slot_minutes,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_id_formats() {
        assert_eq!(normalize_event_type_id(&json!(42)), Some(42));
        assert_eq!(normalize_event_type_id(&json!(" 42 ")), Some(42));
        assert_eq!(normalize_event_type_id(&json!("cal_1759650430507_boxv695kh")), Some(1759650430507));
        assert_eq!(normalize_event_type_id(&json!("cal_")), None);
        assert_eq!(normalize_event_type_id(&json!("abc")), None);
        assert_eq!(normalize_event_type_id(&json!(null)), None);
    }

    #[test]
    fn test_registry_rejects_bad_credentials() {
        let mut creds = BookingCredentials {
            provider: BookingProviderKind::CalCom,
            api_key: "cal_live_x".to_string(),
            event_type_id: json!("nope"),
            timezone: "UTC".to_string(),
            slot_minutes: 30,
        };
        assert!(CalendarRegistry.build(&creds).is_err());

        creds.event_type_id = json!(7);
        creds.timezone = "Mars/Olympus".to_string();
        assert!(CalendarRegistry.build(&creds).is_err());

        creds.timezone = "Asia/Karachi".to_string();
        assert!(CalendarRegistry.build(&creds).is_ok());
    }
}
