//! Datetime and timezone helpers.
//!
//! All persisted timestamps are UTC. Naive values coming from users are
//! interpreted in the local timezone and converted.
//!
//! ```
//! use apitoolbox::tz;
//! let a = tz::utcdatetime(2015, 1, 2, 1, 2, 3).unwrap();
//! let b = tz::parse("2015-01-02T01:02:03Z").unwrap();
//! assert_eq!(a, b);
//! ```

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};

use crate::error::AppError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Current time, UTC aware, truncated to the microsecond precision timestamps are stored with.
pub fn utcnow() -> DateTime<Utc> { Utc::now().trunc_subsecs(6) }

/// Same as building a datetime from its parts, but UTC aware.
pub fn utcdatetime(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Result<DateTime<Utc>, AppError> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .ok_or_else(|| AppError::Validation(format!("invalid datetime {year}-{month}-{day} {hour}:{minute}:{second}")))
}

pub fn as_utc<Tz: TimeZone>(value: &DateTime<Tz>) -> DateTime<Utc> { value.with_timezone(&Utc) }

/// Interpret a naive datetime as local time and convert it to UTC.
pub fn as_datetime(value: NaiveDateTime) -> Result<DateTime<Utc>, AppError> {
    Local
        .from_local_datetime(&value)
        .earliest()
        .map(|dt| as_utc(&dt))
        .ok_or_else(|| AppError::Validation(format!("nonexistent local time: {value}")))
}

/// Parse the common textual datetime forms. Values without an offset are local.
pub fn parse(value: &str) -> Result<DateTime<Utc>, AppError> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(as_utc(&dt));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(as_utc(&dt));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return as_datetime(naive);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return as_datetime(date.and_hms_opt(0, 0, 0).unwrap_or_default());
    }
    Err(AppError::Validation(format!("unrecognised datetime: {value}")))
}

/// ISO 8601 with microseconds and a `Z` suffix.
pub fn isoformat(value: &DateTime<Utc>) -> String { value.to_rfc3339_opts(SecondsFormat::Micros, true) }

/// Convert a unix timestamp (seconds, fractional allowed) to UTC.
pub fn from_timestamp(secs: f64) -> DateTime<Utc> {
    let whole = secs.floor() as i64;
    let nanos = ((secs - secs.floor()) * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn utcdatetime_is_utc() {
        let dt = utcdatetime(2015, 1, 2, 1, 2, 3).unwrap();
        assert_eq!(isoformat(&dt), "2015-01-02T01:02:03.000000Z");
        assert!(utcdatetime(2015, 13, 2, 1, 2, 3).is_err());
    }

    #[test]
    fn parse_with_offset_converts_to_utc() {
        let dt = parse("2017-01-02T02:22:00+02:00").unwrap();
        assert_eq!(dt, utcdatetime(2017, 1, 2, 0, 22, 0).unwrap());
    }

    #[test]
    fn parse_naive_assumes_local() {
        let naive = NaiveDate::from_ymd_opt(2017, 1, 2).unwrap().and_hms_opt(2, 22, 0).unwrap();
        let expected = as_datetime(naive).unwrap();
        assert_eq!(parse("2017-01-02 02:22").unwrap(), expected);
        assert_eq!(parse("2017-01-02T02:22:00").unwrap(), expected);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("yesterday-ish").is_err());
    }

    #[test]
    fn timestamps_round_trip_to_the_second() {
        let now = utcnow();
        let back = from_timestamp(now.timestamp() as f64);
        assert!(now - back < Duration::seconds(1));
    }
}
