use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use cinema_models::HallId;

const DATE_KEY: &str = "%Y-%m-%d";
const DATE_DISPLAY: &str = "%d.%m.%Y";
const TIME_KEY: &str = "%H:%M";
const PAYLOAD_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),
    #[error("invalid server timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("movie title must not be empty")]
    EmptyTitle,
}

/// Canonical `YYYY-MM-DD` key of a calendar day.
pub fn date_key(date: NaiveDate) -> String {
    date.format(DATE_KEY).to_string()
}

pub fn parse_date_key(s: &str) -> Result<NaiveDate, KeyError> {
    NaiveDate::parse_from_str(s.trim(), DATE_KEY).map_err(|_| KeyError::InvalidDate(s.to_string()))
}

/// `DD.MM.YYYY`, the form operators read dates in.
pub fn display_date(date: NaiveDate) -> String {
    date.format(DATE_DISPLAY).to_string()
}

pub fn display_time(time: NaiveTime) -> String {
    time.format(TIME_KEY).to_string()
}

// By-reference forms for error message attributes.
pub(crate) fn dmy(date: &NaiveDate) -> String {
    display_date(*date)
}

pub(crate) fn hm(time: &NaiveTime) -> String {
    display_time(*time)
}

/// Parses `HH:MM`; a trailing `:SS` is accepted and dropped.
pub fn parse_time(s: &str) -> Result<NaiveTime, KeyError> {
    let trimmed = s.trim();
    let hhmm = match trimmed.len() {
        8 => trimmed.get(..5).unwrap_or(trimmed),
        _ => trimmed,
    };
    NaiveTime::parse_from_str(hhmm, TIME_KEY).map_err(|_| KeyError::InvalidTime(s.to_string()))
}

/// Collision key of a slot: two sessions with the same key on the same day
/// occupy the same hall at the same time.
pub fn collision_key(time: NaiveTime, hall: HallId) -> String {
    format!("{}-{}", display_time(time), hall)
}

/// Local date+time as sent in session payloads, e.g. `2025-01-10T18:00:00`.
pub fn payload_datetime(date: NaiveDate, time: NaiveTime) -> String {
    date.and_time(time).format(PAYLOAD_DATETIME).to_string()
}

/// Converts a backend timestamp into local wall-clock time in `tz`.
///
/// Timestamps carrying an offset (`Z`, `+02:00`) are converted; naive ones are
/// taken as already local.
pub fn normalize_server_datetime(s: &str, tz: Tz) -> Result<NaiveDateTime, KeyError> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&tz).naive_local());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(naive);
        }
    }
    Err(KeyError::InvalidTimestamp(s.to_string()))
}

/// Today's calendar day in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

pub fn is_past(date: NaiveDate, today: NaiveDate) -> bool {
    date < today
}

/// `start_date`/`end_date` query bounds covering one whole day.
pub fn day_bounds(date: NaiveDate) -> (String, String) {
    let key = date_key(date);
    (format!("{key}T00:00:00"), format!("{key}T23:59:59"))
}
