//! Conversion between ISO-8601 strings and epoch milliseconds

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::error::{FeedError, Result};

/// Parse an ISO-8601 timestamp into epoch milliseconds.
///
/// Accepts RFC 3339 (`2022-08-04T00:00:00Z`, with or without fractional seconds
/// and offsets), a naive date-time taken as UTC (`2022-08-04T00:00:00`) and a
/// bare date (`2022-08-04`, midnight UTC).
pub fn parse_iso(s: &str) -> Result<u64> {
    let s = s.trim();

    let utc = if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        dt.with_timezone(&Utc)
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        Utc.from_utc_datetime(&naive)
    } else {
        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| FeedError::InvalidTime(s.to_string()))?;
        Utc.from_utc_datetime(&midnight)
    };

    u64::try_from(utc.timestamp_millis())
        .map_err(|_| FeedError::InvalidTime(format!("{} is before the epoch", s)))
}

/// Format epoch milliseconds as an ISO-8601 UTC string
pub fn to_iso(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rfc3339() {
        assert_eq!(parse_iso("2022-08-04T00:00:00Z").unwrap(), 1_659_571_200_000);
        assert_eq!(
            parse_iso("2022-08-04T02:00:00.250+02:00").unwrap(),
            1_659_571_200_250
        );
    }

    #[test]
    fn test_parse_naive_and_date() {
        assert_eq!(parse_iso("2022-08-04T00:00:00").unwrap(), 1_659_571_200_000);
        assert_eq!(parse_iso("2022-08-04").unwrap(), 1_659_571_200_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_iso("yesterday"),
            Err(FeedError::InvalidTime(_))
        ));
        assert!(parse_iso("1969-12-31T00:00:00Z").is_err());
    }

    #[test]
    fn test_to_iso() {
        assert_eq!(to_iso(1_659_571_200_250), "2022-08-04T00:00:00.250Z");
    }
}
