use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use receptionist::errors::{AvailabilityError, ReserveError};
use receptionist::models::{BookingPhase, ReservationRequest, Slot};
use receptionist::services::booking::{
    BookingPolicy, BookingStateMachine, CommitOutcome, ListOutcome, SelectOutcome, VerifyOutcome,
};
use receptionist::services::calendar::AvailabilityBackend;

// ── Mock calendar ──

/// Offers 09:00, 09:30 and 10:00 on any listed day, minus reserved slots.
/// Reservations pop scripted results; an empty script books successfully.
struct ScriptedCalendar {
    script: Mutex<VecDeque<Result<Option<String>, ReserveError>>>,
    reserve_delay: Duration,
    taken: Mutex<HashSet<DateTime<Utc>>>,
    reserve_calls: AtomicUsize,
}

impl ScriptedCalendar {
    fn new() -> Self {
        Self::scripted(vec![], Duration::ZERO)
    }

    fn scripted(script: Vec<Result<Option<String>, ReserveError>>, reserve_delay: Duration) -> Self {
        Self {
            script: Mutex::new(script.into()),
            reserve_delay,
            taken: Mutex::new(HashSet::new()),
            reserve_calls: AtomicUsize::new(0),
        }
    }

    fn reserve_calls(&self) -> usize {
        self.reserve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AvailabilityBackend for ScriptedCalendar {
    async fn list_slots(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Slot>, AvailabilityError> {
        let taken = self.taken.lock().unwrap().clone();
        let day_start = start
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight.and_utc())
            .unwrap_or(start);
        Ok([9 * 60, 9 * 60 + 30, 10 * 60]
            .into_iter()
            .map(|minutes| {
                let slot_start = day_start + chrono::Duration::minutes(minutes);
                Slot {
                    start: slot_start,
                    end: slot_start + chrono::Duration::minutes(30),
                }
            })
            .filter(|s| s.start >= start && s.start < end && !taken.contains(&s.start))
            .collect())
    }

    async fn reserve(&self, request: &ReservationRequest) -> Result<Option<String>, ReserveError> {
        self.reserve_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Some("apt-default".to_string())));
        if result.is_ok() {
            self.taken.lock().unwrap().insert(request.slot.start);
        }
        if !self.reserve_delay.is_zero() {
            tokio::time::sleep(self.reserve_delay).await;
        }
        result
    }
}

// ── Helpers ──

fn utc() -> Tz {
    "UTC".parse().unwrap()
}

fn machine(calendar: Arc<ScriptedCalendar>) -> BookingStateMachine {
    BookingStateMachine::new(Some(calendar), utc(), BookingPolicy::default())
}

async fn select_first_slot(booking: &BookingStateMachine) {
    let listed = booking.list_slots_on_day("tomorrow", 10).await;
    assert!(matches!(listed, ListOutcome::Listed { total: 3, .. }), "{listed:?}");
    let selected = booking.choose_slot("1").await;
    assert!(matches!(selected, SelectOutcome::Selected { .. }), "{selected}");
}

fn fill_contact(booking: &BookingStateMachine) {
    booking.set_name("Jane Doe").unwrap();
    booking.set_email("jane dot doe at gmail dot com").unwrap();
    booking.set_phone("+1 (555) 123-4567").unwrap();
}

// ── Commit ──

#[tokio::test(start_paused = true)]
async fn test_commit_twice_reserves_once() {
    let calendar = Arc::new(ScriptedCalendar::new());
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);
    assert_eq!(booking.phase(), BookingPhase::Ready);

    let first = booking.commit().await;
    assert!(first.is_booked(), "{first}");
    assert_eq!(booking.phase(), BookingPhase::Booked);

    let second = booking.commit().await;
    assert!(matches!(second, CommitOutcome::AlreadyBooked));
    assert_eq!(calendar.reserve_calls(), 1);
    assert_eq!(booking.appointments().len(), 1);
    assert_eq!(booking.appointments()[0].email, "jane.doe@gmail.com");
    assert_eq!(booking.appointments()[0].phone, "+15551234567");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_commits_make_one_reservation() {
    let calendar = Arc::new(ScriptedCalendar::scripted(vec![], Duration::from_secs(2)));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let (a, b) = tokio::join!(booking.commit(), booking.commit());
    let booked = [&a, &b].iter().filter(|o| o.is_booked()).count();
    let in_flight = [&a, &b]
        .iter()
        .filter(|o| matches!(o, CommitOutcome::InFlight))
        .count();
    assert_eq!((booked, in_flight), (1, 1));
    assert_eq!(calendar.reserve_calls(), 1);

    assert!(matches!(booking.commit().await, CommitOutcome::AlreadyBooked));
    assert_eq!(calendar.reserve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_choosing_slot_with_contact_known_commits() {
    let calendar = Arc::new(ScriptedCalendar::new());
    let booking = machine(calendar.clone());
    fill_contact(&booking);
    booking.list_slots_on_day("tomorrow", 10).await;

    let outcome = booking.choose_slot("2").await;
    match outcome {
        SelectOutcome::Committed(commit) => assert!(commit.is_booked(), "{commit}"),
        other => panic!("expected a commit, got {other}"),
    }
    assert_eq!(calendar.reserve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_retry_then_succeed() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![
            Err(ReserveError::ServerError("502".to_string())),
            Err(ReserveError::RateLimited),
            Ok(Some("apt-42".to_string())),
        ],
        Duration::ZERO,
    ));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let outcome = booking.commit().await;
    assert!(outcome.is_booked(), "{outcome}");
    assert_eq!(calendar.reserve_calls(), 3);
    assert_eq!(
        booking.appointments()[0].appointment_id.as_deref(),
        Some("apt-42")
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_after_max_attempts() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![
            Err(ReserveError::Connection("reset".to_string())),
            Err(ReserveError::Connection("reset".to_string())),
            Err(ReserveError::Connection("reset".to_string())),
            Ok(Some("never".to_string())),
        ],
        Duration::ZERO,
    ));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let outcome = booking.commit().await;
    assert!(matches!(outcome, CommitOutcome::Failed(_)), "{outcome}");
    assert_eq!(calendar.reserve_calls(), 3);
    assert!(booking.appointments().is_empty());
    assert_eq!(booking.phase(), BookingPhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_errors_are_not_retried() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![Err(ReserveError::SlotUnavailable)],
        Duration::ZERO,
    ));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let outcome = booking.commit().await;
    assert!(matches!(outcome, CommitOutcome::SlotTaken), "{outcome}");
    assert_eq!(calendar.reserve_calls(), 1);
    assert!(booking.snapshot().selected_slot.is_none());
    assert!(booking.snapshot().has_contact());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_is_ambiguous_and_verify_settles_it() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![Ok(Some("late".to_string()))],
        Duration::from_secs(60),
    ));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let outcome = booking.commit().await;
    assert!(matches!(outcome, CommitOutcome::Ambiguous), "{outcome}");
    assert_eq!(calendar.reserve_calls(), 1);
    assert!(booking.appointments().is_empty());

    let verified = booking.verify().await;
    assert!(matches!(verified, VerifyOutcome::Confirmed { .. }), "{verified}");
    let appointments = booking.appointments();
    assert_eq!(appointments.len(), 1);
    assert!(appointments[0].verified_by_lookup);
    assert_eq!(booking.verify().await, VerifyOutcome::AlreadyBooked);
}

#[tokio::test(start_paused = true)]
async fn test_verify_reports_slot_still_open() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![
            Err(ReserveError::Timeout),
            Err(ReserveError::Timeout),
            Err(ReserveError::Timeout),
        ],
        Duration::ZERO,
    ));
    let booking = machine(calendar.clone());
    assert_eq!(booking.verify().await, VerifyOutcome::NothingToVerify);

    select_first_slot(&booking).await;
    fill_contact(&booking);
    let outcome = booking.commit().await;
    assert!(matches!(outcome, CommitOutcome::Ambiguous), "{outcome}");
    assert!(booking.snapshot().awaiting_verification);

    assert_eq!(booking.verify().await, VerifyOutcome::NotBooked);
    assert!(!booking.snapshot().awaiting_verification);
    assert!(booking.appointments().is_empty());
    assert_eq!(booking.verify().await, VerifyOutcome::NothingToVerify);
}

#[tokio::test(start_paused = true)]
async fn test_verify_without_commit_books_nothing() {
    let calendar = Arc::new(ScriptedCalendar::new());
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    let slot = booking.snapshot().selected_slot.unwrap();
    calendar.taken.lock().unwrap().insert(slot.start);

    assert_eq!(booking.verify().await, VerifyOutcome::NothingToVerify);
    assert!(booking.appointments().is_empty());
    assert!(!booking.snapshot().booked);
    assert_ne!(booking.phase(), BookingPhase::Booked);
    assert_eq!(calendar.reserve_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_verify_waits_for_inflight_commit() {
    let calendar = Arc::new(ScriptedCalendar::scripted(vec![], Duration::from_secs(1)));
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);

    let (committed, verified) = tokio::join!(booking.commit(), booking.verify());
    assert!(committed.is_booked(), "{committed}");
    assert_eq!(verified, VerifyOutcome::InFlight);
    assert_eq!(booking.appointments().len(), 1);
    assert_eq!(calendar.reserve_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_selection_clears_pending_verification() {
    let calendar = Arc::new(ScriptedCalendar::scripted(
        vec![
            Err(ReserveError::Timeout),
            Err(ReserveError::Timeout),
            Err(ReserveError::Timeout),
        ],
        Duration::ZERO,
    ));
    let booking = machine(calendar);
    select_first_slot(&booking).await;
    fill_contact(&booking);
    assert!(matches!(booking.commit().await, CommitOutcome::Ambiguous));

    // Contact is complete, so choosing again commits straight away.
    booking.list_slots_on_day("tomorrow", 10).await;
    let selected = booking.choose_slot("2").await;
    assert!(matches!(selected, SelectOutcome::Committed(ref c) if c.is_booked()), "{selected}");
    assert!(!booking.snapshot().awaiting_verification);
    assert_eq!(booking.verify().await, VerifyOutcome::AlreadyBooked);
}

#[tokio::test(start_paused = true)]
async fn test_new_slot_after_booking_starts_new_booking() {
    let calendar = Arc::new(ScriptedCalendar::new());
    let booking = machine(calendar.clone());
    select_first_slot(&booking).await;
    fill_contact(&booking);
    assert!(booking.commit().await.is_booked());

    booking.list_slots_on_day("tomorrow", 10).await;
    let selected = booking.choose_slot("1").await;
    assert!(matches!(selected, SelectOutcome::Selected { .. }), "{selected}");
    assert!(!booking.snapshot().booked);
    assert_eq!(booking.phase(), BookingPhase::Collecting);
}

// ── Listing ──

#[tokio::test(start_paused = true)]
async fn test_stale_selection_rejected_after_relisting() {
    let calendar = Arc::new(ScriptedCalendar::new());
    let booking = machine(calendar);

    let ListOutcome::Listed { .. } = booking.list_slots_on_day("tomorrow", 10).await else {
        panic!("expected slots for tomorrow");
    };
    let tomorrow_first = match booking.choose_slot("1").await {
        SelectOutcome::Selected { slot, .. } => slot,
        other => panic!("expected selection, got {other}"),
    };

    let day_after = (Utc::now() + chrono::Duration::days(2))
        .format("%Y-%m-%d")
        .to_string();
    booking.list_slots_on_day(&day_after, 10).await;

    let stale = booking.choose_slot(&tomorrow_first.key()).await;
    assert!(matches!(stale, SelectOutcome::NotFound(_)), "{stale}");
    assert_eq!(
        stale.to_string(),
        format!("Option {} isn't available. Say 'list slots' to refresh.", tomorrow_first.key())
    );
}

#[tokio::test(start_paused = true)]
async fn test_listing_never_goes_before_today() {
    let booking = machine(Arc::new(ScriptedCalendar::new()));
    let today = Utc::now().date_naive();

    match booking.list_slots_on_day("2020-01-01", 10).await {
        ListOutcome::DateInPast(date) => assert!(date < today),
        other => panic!("expected a past date, got {other:?}"),
    }

    for day in ["today", "tomorrow", "monday", "friday", "7 october"] {
        match booking.list_slots_on_day(day, 10).await {
            ListOutcome::Listed { date, .. } | ListOutcome::NoSlots { date, .. } => {
                assert!(date >= today, "{day} resolved to {date}")
            }
            other => panic!("{day}: unexpected {other:?}"),
        }
    }

    assert_eq!(booking.list_slots_on_day("whenever works", 10).await, ListOutcome::InvalidDay);
}

#[tokio::test(start_paused = true)]
async fn test_listing_caps_options_but_reports_total() {
    let booking = machine(Arc::new(ScriptedCalendar::new()));
    match booking.list_slots_on_day("tomorrow", 2).await {
        ListOutcome::Listed { lines, total, .. } => {
            assert_eq!(lines.len(), 2);
            assert_eq!(total, 3);
            assert!(lines[0].starts_with("1. "));
        }
        other => panic!("unexpected {other:?}"),
    }
    // Options past the displayed ones still resolve.
    assert!(matches!(booking.choose_slot("3").await, SelectOutcome::Selected { .. }));
}

// ── Contact fields ──

#[test]
fn test_contact_fields_are_normalized() {
    let booking = BookingStateMachine::new(None, utc(), BookingPolicy::default());
    assert_eq!(
        booking.set_email("Jane Dot Doe AT Gmail dot com").unwrap(),
        "Email set to jane.doe@gmail.com."
    );
    assert_eq!(
        booking.set_phone("92 300 1234567").unwrap(),
        "Phone number set to +923001234567."
    );
    assert!(booking.set_email("not an email").is_err());
    assert!(booking.set_phone("12").is_err());

    let state = booking.snapshot();
    assert_eq!(state.email.as_deref(), Some("jane.doe@gmail.com"));
    assert_eq!(state.phone.as_deref(), Some("+923001234567"));
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_state_and_catalog() {
    let booking = machine(Arc::new(ScriptedCalendar::new()));
    select_first_slot(&booking).await;
    fill_contact(&booking);

    booking.reset();
    assert_eq!(booking.phase(), BookingPhase::Empty);
    assert!(matches!(booking.choose_slot("1").await, SelectOutcome::NotFound(_)));
}
