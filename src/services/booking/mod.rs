pub mod contact;
pub mod dates;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::errors::ReserveError;
use crate::models::{Appointment, BookingPhase, BookingState, ReservationRequest, Slot};
use crate::services::calendar::AvailabilityBackend;
use crate::state::lock;
use crate::telemetry::{mask_email, mask_phone};

use self::contact::ContactError;
use self::dates::{day_window, format_clock, format_long, local_today, parse_clock_time, DayParse};

/// Deadlines and retry budget for calendar calls.
#[derive(Debug, Clone, Copy)]
pub struct BookingPolicy {
    pub list_timeout: Duration,
    pub reserve_timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub verify_window: chrono::Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            list_timeout: Duration::from_secs(5),
            reserve_timeout: Duration::from_secs(15),
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            verify_window: chrono::Duration::minutes(30),
        }
    }
}

/// The most recent slot listing. Replaced wholesale on every listing, so
/// indices and keys from an earlier listing never resolve.
#[derive(Debug, Default)]
pub struct SlotCatalog {
    slots: Vec<Slot>,
}

impl SlotCatalog {
    pub fn replace(&mut self, mut slots: Vec<Slot>) {
        slots.sort_by_key(|s| s.start);
        slots.dedup_by_key(|s| s.start);
        self.slots = slots;
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Exact key, then 1-based display index, then local clock time.
    pub fn resolve(&self, identifier: &str, tz: Tz) -> Option<Slot> {
        let id = identifier.trim();
        if id.is_empty() {
            return None;
        }

        if let Some(slot) = self.slots.iter().find(|s| s.key() == id) {
            return Some(slot.clone());
        }
        if let Ok(at) = DateTime::parse_from_rfc3339(id) {
            let at = at.with_timezone(&Utc);
            return self.slots.iter().find(|s| s.start == at).cloned();
        }

        if let Ok(index) = id.parse::<usize>() {
            return index
                .checked_sub(1)
                .and_then(|i| self.slots.get(i))
                .cloned();
        }

        let wanted = parse_clock_time(id)?;
        self.slots
            .iter()
            .find(|s| s.start.with_timezone(&tz).time() == wanted)
            .cloned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOutcome {
    Listed {
        date: NaiveDate,
        day: String,
        lines: Vec<String>,
        total: usize,
    },
    NoSlots {
        date: NaiveDate,
        day: String,
    },
    Unavailable,
    TimedOut,
    InvalidDay,
    DateInPast(NaiveDate),
    NoCalendar,
}

impl fmt::Display for ListOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListOutcome::Listed { day, lines, total, .. } => {
                write!(f, "Available slots for {day}:\n{}", lines.join("\n"))?;
                if *total > lines.len() {
                    write!(
                        f,
                        "\nI'm showing you {} of {total} total available slots. You can choose any time slot from the list above, or ask me to show more options.",
                        lines.len()
                    )?;
                }
                Ok(())
            }
            ListOutcome::NoSlots { day, .. } => write!(f, "No available slots for {day}."),
            ListOutcome::Unavailable => write!(f, "Calendar service is temporarily unavailable."),
            ListOutcome::TimedOut => write!(
                f,
                "I'm having trouble connecting to the calendar. Please try again in a moment."
            ),
            ListOutcome::InvalidDay => write!(
                f,
                "Please say the day like 'today', 'tomorrow', 'Friday', or '2025-09-05'."
            ),
            ListOutcome::DateInPast(date) => write!(
                f,
                "{} has already passed. Please pick today or a later date.",
                date.format("%B %d, %Y")
            ),
            ListOutcome::NoCalendar => write!(f, "I can't take bookings right now."),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Booked {
        when: String,
        email: String,
        appointment: Appointment,
    },
    AlreadyBooked,
    InFlight,
    Missing(Vec<&'static str>),
    SlotTaken,
    /// The backend's result is unknown; `verify` can settle it.
    Ambiguous,
    Failed(String),
    NoCalendar,
}

impl CommitOutcome {
    pub fn is_booked(&self) -> bool {
        matches!(self, CommitOutcome::Booked { .. })
    }
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Booked { when, email, .. } => write!(
                f,
                "Perfect! Booked for {when}. A confirmation will go to {email}. Need another time?"
            ),
            CommitOutcome::AlreadyBooked => write!(
                f,
                "Your appointment is already booked! Is there anything else I can help you with?"
            ),
            CommitOutcome::InFlight => write!(f, "I'm processing your booking, one moment please."),
            CommitOutcome::Missing(fields) => write!(
                f,
                "We need to collect all the details first. We're missing: {}.",
                fields.join(", ")
            ),
            CommitOutcome::SlotTaken => write!(f, "That time was just taken. Let's pick another option."),
            CommitOutcome::Ambiguous => write!(
                f,
                "The booking is taking longer than expected. I can verify if it went through, just say 'verify booking', or I can try booking again."
            ),
            CommitOutcome::Failed(reason) => write!(
                f,
                "I ran into a problem booking that: {reason}. Let's try a different time."
            ),
            CommitOutcome::NoCalendar => write!(f, "I can't take bookings right now."),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SelectOutcome {
    Selected {
        slot: Slot,
        when: String,
        missing: Vec<&'static str>,
    },
    /// Every contact field was already known, so the selection committed.
    Committed(CommitOutcome),
    NotFound(String),
}

impl fmt::Display for SelectOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectOutcome::Selected { when, missing, .. } => {
                write!(f, "Great, {when}. I still need your {}.", missing.join(", "))
            }
            SelectOutcome::Committed(outcome) => write!(f, "{outcome}"),
            SelectOutcome::NotFound(id) => {
                write!(f, "Option {id} isn't available. Say 'list slots' to refresh.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    NothingToVerify,
    AlreadyBooked,
    InFlight,
    Confirmed { when: String },
    NotBooked,
    Failed,
    NoCalendar,
}

impl fmt::Display for VerifyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyOutcome::NothingToVerify => write!(
                f,
                "I don't have a booking to verify. Let's start over with a new appointment."
            ),
            VerifyOutcome::AlreadyBooked => write!(
                f,
                "Your booking is confirmed. You should receive a confirmation email shortly."
            ),
            VerifyOutcome::InFlight => write!(f, "I'm still processing your booking, one moment please."),
            VerifyOutcome::Confirmed { when } => write!(
                f,
                "Good news! Your booking is confirmed for {when}. The slot is no longer available, which means it was successfully booked."
            ),
            VerifyOutcome::NotBooked => write!(
                f,
                "The slot is still available, so the booking didn't go through. Would you like me to try booking it again?"
            ),
            VerifyOutcome::Failed => write!(
                f,
                "I'm having trouble verifying the booking status. Would you like me to try booking again or pick a different time?"
            ),
            VerifyOutcome::NoCalendar => write!(f, "I can't take bookings right now."),
        }
    }
}

enum ReserveFailure {
    /// Our own deadline elapsed; the backend may or may not have booked.
    Deadline,
    Backend(ReserveError),
}

/// Clears the in-flight flag even if the commit future is dropped.
struct InflightGuard<'a>(&'a AtomicBool);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Slot selection, contact collection and exactly-once commit for one call.
pub struct BookingStateMachine {
    backend: Option<Arc<dyn AvailabilityBackend>>,
    timezone: Tz,
    policy: BookingPolicy,
    state: Mutex<BookingState>,
    catalog: Mutex<SlotCatalog>,
    completed: Mutex<Vec<Appointment>>,
    inflight: AtomicBool,
}

impl BookingStateMachine {
    pub fn new(backend: Option<Arc<dyn AvailabilityBackend>>, timezone: Tz, policy: BookingPolicy) -> Self {
        Self {
            backend,
            timezone,
            policy,
            state: Mutex::new(BookingState::default()),
            catalog: Mutex::new(SlotCatalog::default()),
            completed: Mutex::new(Vec::new()),
            inflight: AtomicBool::new(false),
        }
    }

    pub fn has_calendar(&self) -> bool {
        self.backend.is_some()
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn snapshot(&self) -> BookingState {
        lock(&self.state).clone()
    }

    /// Appointments committed (or verified) during this call.
    pub fn appointments(&self) -> Vec<Appointment> {
        lock(&self.completed).clone()
    }

    pub fn phase(&self) -> BookingPhase {
        if self.inflight.load(Ordering::Acquire) {
            return BookingPhase::Booking;
        }
        let state = lock(&self.state);
        if state.booked {
            BookingPhase::Booked
        } else if state.missing_fields().is_empty() {
            BookingPhase::Ready
        } else if state.selected_slot.is_some()
            || state.name.is_some()
            || state.email.is_some()
            || state.phone.is_some()
        {
            BookingPhase::Collecting
        } else {
            BookingPhase::Empty
        }
    }

    pub async fn list_slots_on_day(&self, day: &str, max_options: usize) -> ListOutcome {
        let Some(backend) = &self.backend else {
            return ListOutcome::NoCalendar;
        };

        let date = match dates::parse_day(day, local_today(self.timezone)) {
            DayParse::Date(date) => date,
            DayParse::Past(date) => return ListOutcome::DateInPast(date),
            DayParse::Unrecognized => return ListOutcome::InvalidDay,
        };
        let Some((start, end)) = day_window(date, self.timezone) else {
            return ListOutcome::InvalidDay;
        };

        let slots = match tokio::time::timeout(self.policy.list_timeout, backend.list_slots(start, end)).await {
            Ok(Ok(slots)) => slots,
            Ok(Err(e)) => {
                tracing::warn!(day, error = %e, "slot listing failed");
                return ListOutcome::Unavailable;
            }
            Err(_) => {
                tracing::warn!(day, timeout = ?self.policy.list_timeout, "slot listing timed out");
                return ListOutcome::TimedOut;
            }
        };

        let mut catalog = lock(&self.catalog);
        catalog.replace(slots);
        let total = catalog.len();
        let day = day.trim().to_string();
        tracing::info!(%date, total, "slots listed");
        if catalog.is_empty() {
            return ListOutcome::NoSlots { date, day };
        }

        let lines = catalog
            .slots()
            .iter()
            .take(max_options.max(1))
            .enumerate()
            .map(|(i, slot)| format!("{}. {}", i + 1, format_clock(slot.start, self.timezone)))
            .collect();
        ListOutcome::Listed {
            date,
            day,
            lines,
            total,
        }
    }

    pub async fn choose_slot(&self, option_id: &str) -> SelectOutcome {
        let resolved = lock(&self.catalog).resolve(option_id, self.timezone);
        let Some(slot) = resolved else {
            tracing::info!(option_id, "slot selection did not resolve");
            return SelectOutcome::NotFound(option_id.trim().to_string());
        };

        let missing = {
            let mut state = lock(&self.state);
            // Choosing a new slot starts a new booking.
            state.booked = false;
            state.appointment_id = None;
            state.confirmed = false;
            state.awaiting_verification = false;
            state.selected_slot = Some(slot.clone());
            state.missing_fields()
        };
        tracing::info!(slot = %slot.key(), "slot selected");

        if missing.is_empty() {
            tracing::info!("all contact fields present, committing");
            return SelectOutcome::Committed(self.commit().await);
        }
        SelectOutcome::Selected {
            when: format_long(slot.start, self.timezone),
            slot,
            missing,
        }
    }

    pub fn set_name(&self, raw: &str) -> Result<String, ContactError> {
        let name = contact::normalize_name(raw)?;
        lock(&self.state).name = Some(name.clone());
        Ok(format!("Name set to {name}."))
    }

    pub fn set_email(&self, raw: &str) -> Result<String, ContactError> {
        let email = contact::normalize_email(raw)?;
        tracing::info!(email = %mask_email(&email), "email set");
        lock(&self.state).email = Some(email.clone());
        Ok(format!("Email set to {email}."))
    }

    pub fn set_phone(&self, raw: &str) -> Result<String, ContactError> {
        let phone = contact::normalize_phone(raw)?;
        tracing::info!(phone = %mask_phone(&phone), "phone set");
        lock(&self.state).phone = Some(phone.clone());
        Ok(format!("Phone number set to {phone}."))
    }

    pub fn set_notes(&self, notes: &str) -> String {
        let notes = notes.trim();
        lock(&self.state).notes = (!notes.is_empty()).then(|| notes.to_string());
        format!("Notes set: {notes}")
    }

    pub fn collect_missing_info(&self) -> String {
        let missing = lock(&self.state).missing_fields();
        if missing.is_empty() {
            "Great! I have all the information I need. Let me confirm your appointment details."
                .to_string()
        } else {
            format!(
                "I need: {}. Please say them in one go like: 'I'm Alex, email alex@example.com, phone plus nine two...'",
                missing.join(", ")
            )
        }
    }

    pub fn decline_details(&self) -> String {
        lock(&self.state).confirmed = false;
        "No problem. What would you like to change: name, email, phone, or time?".to_string()
    }

    pub fn reset(&self) -> String {
        *lock(&self.state) = BookingState::default();
        lock(&self.catalog).clear();
        tracing::info!("booking state reset");
        "Great! Let's start fresh. What day would you like to book an appointment?".to_string()
    }

    /// Reserves the selected slot. At most one reservation is in flight and
    /// a booked state is never committed twice.
    pub async fn commit(&self) -> CommitOutcome {
        let Some(backend) = self.backend.clone() else {
            return CommitOutcome::NoCalendar;
        };
        if self
            .inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return CommitOutcome::InFlight;
        }
        let _guard = InflightGuard(&self.inflight);

        let request = {
            let mut state = lock(&self.state);
            if state.booked {
                tracing::info!("booking already completed, skipping commit");
                return CommitOutcome::AlreadyBooked;
            }
            let request = match (&state.selected_slot, &state.name, &state.email, &state.phone) {
                (Some(slot), Some(name), Some(email), Some(phone)) => ReservationRequest {
                    slot: slot.clone(),
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                    notes: state.notes.clone(),
                },
                _ => return CommitOutcome::Missing(state.missing_fields()),
            };
            state.confirmed = true;
            state.awaiting_verification = false;
            request
        };

        tracing::info!(
            start = %request.slot.start,
            email = %mask_email(&request.email),
            phone = %mask_phone(&request.phone),
            "booking attempt"
        );

        match self.reserve_with_retry(backend.as_ref(), &request).await {
            Ok(appointment_id) => {
                let appointment = self.record_success(&request, appointment_id, false);
                CommitOutcome::Booked {
                    when: format_long(request.slot.start, self.timezone),
                    email: request.email,
                    appointment,
                }
            }
            Err(ReserveFailure::Backend(ReserveError::SlotUnavailable)) => {
                let mut state = lock(&self.state);
                state.selected_slot = None;
                state.confirmed = false;
                tracing::warn!(start = %request.slot.start, "slot taken before commit");
                CommitOutcome::SlotTaken
            }
            Err(ReserveFailure::Deadline) | Err(ReserveFailure::Backend(ReserveError::Timeout)) => {
                let mut state = lock(&self.state);
                state.confirmed = false;
                state.awaiting_verification = true;
                tracing::error!(timeout = ?self.policy.reserve_timeout, "booking outcome unknown after timeout");
                CommitOutcome::Ambiguous
            }
            Err(ReserveFailure::Backend(e)) => {
                lock(&self.state).confirmed = false;
                tracing::error!(error = %e, "booking failed");
                CommitOutcome::Failed(e.to_string())
            }
        }
    }

    async fn reserve_with_retry(
        &self,
        backend: &dyn AvailabilityBackend,
        request: &ReservationRequest,
    ) -> Result<Option<String>, ReserveFailure> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(self.policy.reserve_timeout, backend.reserve(request))
                .await
                .map_err(|_| ReserveFailure::Deadline)?;

            match result {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.base_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay = ?delay,
                        error = %e,
                        "retrying reservation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ReserveFailure::Backend(e)),
            }
        }
    }

    fn record_success(
        &self,
        request: &ReservationRequest,
        appointment_id: Option<String>,
        verified_by_lookup: bool,
    ) -> Appointment {
        let appointment = Appointment {
            appointment_id: appointment_id.clone(),
            start: request.slot.start,
            name: request.name.clone(),
            email: request.email.clone(),
            phone: request.phone.clone(),
            notes: request.notes.clone(),
            verified_by_lookup,
        };
        // Fresh state for a follow-on booking; the latch stays set until a
        // new slot is chosen or the booking is explicitly restarted.
        *lock(&self.state) = BookingState {
            booked: true,
            appointment_id,
            ..BookingState::default()
        };
        lock(&self.completed).push(appointment.clone());
        tracing::info!(start = %appointment.start, verified_by_lookup, "appointment booked");
        appointment
    }

    /// Settles an ambiguous commit by checking whether the slot is still
    /// offered. Shares the in-flight latch with `commit`.
    pub async fn verify(&self) -> VerifyOutcome {
        let Some(backend) = self.backend.clone() else {
            return VerifyOutcome::NoCalendar;
        };
        if self
            .inflight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return VerifyOutcome::InFlight;
        }
        let _guard = InflightGuard(&self.inflight);

        let request = {
            let state = lock(&self.state);
            if state.booked {
                return VerifyOutcome::AlreadyBooked;
            }
            if !state.awaiting_verification {
                return VerifyOutcome::NothingToVerify;
            }
            match (&state.selected_slot, &state.name, &state.email, &state.phone) {
                (Some(slot), Some(name), Some(email), Some(phone)) => ReservationRequest {
                    slot: slot.clone(),
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                    notes: state.notes.clone(),
                },
                _ => return VerifyOutcome::NothingToVerify,
            }
        };
        let slot = &request.slot;

        let window_end = slot.start + self.policy.verify_window;
        let listed = tokio::time::timeout(self.policy.list_timeout, backend.list_slots(slot.start, window_end)).await;
        let slots = match listed {
            Ok(Ok(slots)) => slots,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "booking verification failed");
                return VerifyOutcome::Failed;
            }
            Err(_) => {
                tracing::error!("booking verification timed out");
                return VerifyOutcome::Failed;
            }
        };

        if slots.iter().any(|s| s.start == slot.start) {
            lock(&self.state).awaiting_verification = false;
            tracing::info!(start = %slot.start, "slot still open, booking did not go through");
            return VerifyOutcome::NotBooked;
        }

        self.record_success(&request, None, true);
        VerifyOutcome::Confirmed {
            when: format_long(request.slot.start, self.timezone),
        }
    }

    /// Feeds a live-collected field into the booking state when it validates.
    pub fn absorb_collected_field(&self, field_name: &str, value: &str) {
        let result = match field_name.trim() {
            "Customer Name" => self.set_name(value).map(|_| ()),
            "Email Address" => self.set_email(value).map(|_| ()),
            "Phone Number" => self.set_phone(value).map(|_| ()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            tracing::debug!(field_name, error = %e, "collected value not usable for booking");
        }
    }
}
