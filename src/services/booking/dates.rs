use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

static NUMERIC_DAY_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,2})[/\-\s](\d{1,2})\s*$").expect("static regex"));
static ORDINAL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)(st|nd|rd|th)?$").expect("static regex"));
static CLOCK_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})(?::(\d{2}))?(am|pm|a\.m\.|p\.m\.)").expect("static regex"));

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayParse {
    Date(NaiveDate),
    /// An explicit ISO date that lies before today.
    Past(NaiveDate),
    Unrecognized,
}

/// Resolves a loose spoken day expression against `today` (the caller's local
/// date). Relative forms always land on or after `today`.
pub fn parse_day(query: &str, today: NaiveDate) -> DayParse {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return DayParse::Unrecognized;
    }

    match q.as_str() {
        "today" => return DayParse::Date(today),
        "tomorrow" | "tmrw" | "tomorow" | "tommorow" => {
            return DayParse::Date(today + Duration::days(1))
        }
        _ => {}
    }

    if let Some(weekday) = parse_weekday(&q) {
        let delta = (7 + weekday.num_days_from_monday() as i64
            - today.weekday().num_days_from_monday() as i64)
            % 7;
        return DayParse::Date(today + Duration::days(delta));
    }

    if let Ok(date) = NaiveDate::parse_from_str(&q, "%Y-%m-%d") {
        return if date < today {
            DayParse::Past(date)
        } else {
            DayParse::Date(date)
        };
    }

    if let Some(caps) = NUMERIC_DAY_MONTH.captures(&q) {
        let a: u32 = caps[1].parse().unwrap_or(0);
        let b: u32 = caps[2].parse().unwrap_or(0);
        if let Some(date) = next_occurrence(today, a, b).or_else(|| next_occurrence(today, b, a)) {
            return DayParse::Date(date);
        }
    }

    let tokens: Vec<&str> = q.split_whitespace().collect();
    if let [first, second] = tokens[..] {
        let first = first.trim_end_matches(',');
        let day_month = parse_day_number(first).zip(parse_month(second));
        let month_day = parse_day_number(second).zip(parse_month(first));
        if let Some(date) = day_month
            .or(month_day)
            .and_then(|(day, month)| next_occurrence(today, day, month))
        {
            return DayParse::Date(date);
        }
    }

    DayParse::Unrecognized
}

fn parse_weekday(q: &str) -> Option<Weekday> {
    let weekday = match q {
        "mon" | "monday" => Weekday::Mon,
        "tue" | "tues" | "tuesday" => Weekday::Tue,
        "wed" | "wednesday" => Weekday::Wed,
        "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
        "fri" | "friday" => Weekday::Fri,
        "sat" | "saturday" => Weekday::Sat,
        "sun" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn parse_month(token: &str) -> Option<u32> {
    let token = token.trim_end_matches(['.', ',']);
    if token.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| *m == token || m.starts_with(token) && token.len() >= 3)
        .map(|i| i as u32 + 1)
}

fn parse_day_number(token: &str) -> Option<u32> {
    let caps = ORDINAL_SUFFIX.captures(token)?;
    caps[1].parse().ok()
}

/// The first `day`/`month` on or after today. Leap days can be up to eight
/// years away across a skipped century leap year.
fn next_occurrence(today: NaiveDate, day: u32, month: u32) -> Option<NaiveDate> {
    (0..=8)
        .filter_map(|offset| NaiveDate::from_ymd_opt(today.year() + offset, month, day))
        .find(|date| *date >= today)
}

/// Parses `8am`, `3:30pm`, `10:00 AM`.
pub fn parse_clock_time(input: &str) -> Option<NaiveTime> {
    let compact: String = input
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let caps = CLOCK_TIME.captures(&compact)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let pm = caps[3].starts_with('p');
    let hour_24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    NaiveTime::from_hms_opt(hour_24, minute, 0)
}

/// Local calendar day `date` in `tz`, as a UTC half-open window.
pub fn day_window(date: NaiveDate, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = local_midnight(date, tz)?;
    let end = local_midnight(date.succ_opt()?, tz)?;
    Some((start, end))
}

fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn local_today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// `09:30 AM`
pub fn format_clock(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%I:%M %p").to_string()
}

/// `Monday, June 16 at 09:30 AM`
pub fn format_long(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz).format("%A, %B %d at %I:%M %p").to_string()
}
