use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookable window returned by the availability backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Slot {
    /// Stable catalog key, derived from the start time.
    pub fn key(&self) -> String {
        self.start.to_rfc3339()
    }
}

/// Per-call booking fields. `booked` is terminal for the current booking:
/// once set, commits are no-ops until a new booking is started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookingState {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub selected_slot: Option<Slot>,
    pub notes: Option<String>,
    pub confirmed: bool,
    pub booked: bool,
    pub appointment_id: Option<String>,
    /// Set only when a commit ended with an unknown backend result.
    #[serde(default)]
    pub awaiting_verification: bool,
}

impl BookingState {
    /// Names of the fields a commit still needs, in the order they are asked for.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.selected_slot.is_none() {
            missing.push("time slot");
        }
        if self.name.is_none() {
            missing.push("name");
        }
        if self.email.is_none() {
            missing.push("email");
        }
        if self.phone.is_none() {
            missing.push("phone");
        }
        missing
    }

    pub fn has_contact(&self) -> bool {
        self.name.is_some() && self.email.is_some() && self.phone.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingPhase {
    Empty,
    Collecting,
    Ready,
    Booking,
    Booked,
}

impl BookingPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPhase::Empty => "empty",
            BookingPhase::Collecting => "collecting",
            BookingPhase::Ready => "ready",
            BookingPhase::Booking => "booking",
            BookingPhase::Booked => "booked",
        }
    }
}

/// What the availability backend is asked to reserve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub slot: Slot,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub notes: Option<String>,
}

/// A reservation the backend accepted (or that verification inferred).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: Option<String>,
    pub start: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub notes: Option<String>,
    pub verified_by_lookup: bool,
}
