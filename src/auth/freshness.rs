//! Request timestamp freshness checks.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Whether `declared` lies within `max_drift` of `now`, in either direction.
pub fn is_fresh(declared: DateTime<Utc>, now: DateTime<Utc>, max_drift: Duration) -> bool {
    let max_drift = match TimeDelta::from_std(max_drift) {
        Ok(drift) => drift,
        Err(_) => return true,
    };
    let drift = (now - declared).abs();
    drift <= max_drift
}

/// Parse a declared timestamp header.
///
/// Accepts Unix seconds (`1718000000`) or RFC 3339
/// (`2024-06-10T06:13:20Z`).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_drift_both_directions() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let drift = Duration::from_secs(300);

        assert!(is_fresh(now, now, drift));
        assert!(is_fresh(now - TimeDelta::seconds(300), now, drift));
        assert!(is_fresh(now + TimeDelta::seconds(300), now, drift));
        assert!(!is_fresh(now - TimeDelta::seconds(301), now, drift));
        assert!(!is_fresh(now + TimeDelta::seconds(301), now, drift));
    }

    #[test]
    fn test_parse_formats() {
        let expected = DateTime::from_timestamp(1_718_000_000, 0).unwrap();
        assert_eq!(parse_timestamp("1718000000"), Some(expected));
        assert_eq!(parse_timestamp(" 1718000000 "), Some(expected));
        assert_eq!(parse_timestamp("2024-06-10T06:13:20Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-06-10T08:13:20+02:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
