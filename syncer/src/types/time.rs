use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};

/// Canonical format for timestamps written to destinations and checkpoint tables.
pub const CANONICAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Canonical format for date-only values.
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d";

/// Timestamp layouts accepted from the source, tried in order.
const TIMESTAMP_INPUT_FORMATS: &[&str] = &[
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Date layouts accepted from the source, tried in order.
const DATE_INPUT_FORMATS: &[&str] = &["%m/%d/%Y", "%Y-%m-%d"];

/// Parses a timestamp in any of the formats the source emits.
///
/// Date-only values resolve to midnight.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.naive_utc());
    }

    for format in TIMESTAMP_INPUT_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(input, format) {
            return Some(parsed);
        }
    }

    for format in DATE_INPUT_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(input, format) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }

    None
}

pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(CANONICAL_TIMESTAMP_FORMAT).to_string()
}

/// Returns midnight of the day before `timestamp`, or `None` before the earliest date.
pub fn previous_day_start(timestamp: &NaiveDateTime) -> Option<NaiveDateTime> {
    days_ago_start(timestamp, 1)
}

/// Returns midnight of the day `days` days before `now`.
///
/// The time of day is dropped, so the window always covers whole days. Returns `None` when
/// the result falls outside the representable date range.
pub fn days_ago_start(now: &NaiveDateTime, days: u32) -> Option<NaiveDateTime> {
    now.date()
        .checked_sub_signed(Duration::days(i64::from(days)))
        .map(|date| date.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(input: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(input, CANONICAL_TIMESTAMP_FORMAT).unwrap()
    }

    #[test]
    fn test_parse_source_formats() {
        assert_eq!(
            parse_timestamp("03/15/2024 13:45:10"),
            Some(ts("2024-03-15 13:45:10"))
        );
        assert_eq!(
            parse_timestamp("2024-03-15 13:45:10"),
            Some(ts("2024-03-15 13:45:10"))
        );
        assert_eq!(parse_timestamp("03/15/2024"), Some(ts("2024-03-15 00:00:00")));
        assert_eq!(parse_timestamp("2024-03-15"), Some(ts("2024-03-15 00:00:00")));
        assert_eq!(
            parse_timestamp("2024-03-15T13:45:10Z"),
            Some(ts("2024-03-15 13:45:10"))
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("13/45/2024"), None);
    }

    #[test]
    fn test_previous_day_start() {
        assert_eq!(
            previous_day_start(&ts("2024-01-01 00:00:00")),
            Some(ts("2023-12-31 00:00:00"))
        );
        assert_eq!(
            previous_day_start(&ts("2024-03-01 17:30:00")),
            Some(ts("2024-02-29 00:00:00"))
        );
    }

    #[test]
    fn test_days_ago_start() {
        assert_eq!(
            days_ago_start(&ts("2024-03-10 08:00:00"), 3),
            Some(ts("2024-03-07 00:00:00"))
        );
    }

    #[test]
    fn test_days_ago_start_out_of_range() {
        assert_eq!(days_ago_start(&ts("2024-03-10 08:00:00"), u32::MAX), None);
        assert_eq!(previous_day_start(&NaiveDate::MIN.and_time(NaiveTime::MIN)), None);
    }
}
