//! Timestamp parsing for feed and listing dates.
//!
//! Records without a usable date fall back to the Unix epoch so they sort last.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

/// The "no date" marker used for records whose source omitted one.
pub const EPOCH: OffsetDateTime = OffsetDateTime::UNIX_EPOCH;

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    unix_millis(OffsetDateTime::now_utc())
}

pub fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

/// `None` for negative or out-of-range seconds.
pub fn from_unix_secs(secs: i64) -> Option<OffsetDateTime> {
    if secs < 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(secs).ok()
}

/// Parse an RFC 3339 timestamp.
pub fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()
}

/// Parse a `dd/mm/yyyy` day (the mandi feed format) at midnight UTC.
pub fn parse_day_month_year(raw: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[day]/[month]/[year]");
    Date::parse(raw.trim(), format)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Parse an ISO `yyyy-mm-dd` day at midnight UTC.
pub fn parse_iso_day(raw: &str) -> Option<OffsetDateTime> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(raw.trim(), format)
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Best-effort parse of any date shape the feeds are known to send.
pub fn parse_any(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    parse_rfc3339(raw)
        .or_else(|| parse_day_month_year(raw))
        .or_else(|| parse_iso_day(raw))
        .or_else(|| raw.parse::<i64>().ok().and_then(from_unix_secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_mandi_day_format() {
        assert_eq!(
            parse_any("02/01/2024"),
            Some(datetime!(2024-01-02 0:00 UTC))
        );
    }

    #[test]
    fn parses_rfc3339_and_iso_day() {
        assert_eq!(
            parse_any("2024-01-02T10:30:00Z"),
            Some(datetime!(2024-01-02 10:30 UTC))
        );
        assert_eq!(parse_any("2024-01-02"), Some(datetime!(2024-01-02 0:00 UTC)));
    }

    #[test]
    fn garbage_is_not_a_date() {
        assert_eq!(parse_any(""), None);
        assert_eq!(parse_any("not a date"), None);
        assert_eq!(parse_any("31/02/2024"), None);
    }

    #[test]
    fn numeric_text_is_unix_seconds() {
        assert_eq!(parse_any("1704153600"), Some(datetime!(2024-01-02 0:00 UTC)));
    }
}
