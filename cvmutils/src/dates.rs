/// Timestamp utilities for the boot measurement tools.
///
/// Every timestamp handled by the reconstruction engine ends up as floating epoch seconds in the
/// host's wall-clock domain: the host journal reports microsecond epoch integers, the cluster API
/// reports ISO8601 strings at one-second resolution, and the firmware tick counter is translated
/// via a clock anchor.  f64 represents microseconds-since-1970 exactly, so nothing is lost for
/// the sources that actually have sub-second precision.
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

pub type Timestamp = DateTime<Utc>;

pub fn now() -> Timestamp {
    Utc::now()
}

pub fn now_epoch_secs() -> f64 {
    micros_to_secs(Utc::now().timestamp_micros() as u64)
}

pub fn micros_to_secs(us: u64) -> f64 {
    us as f64 / 1e6
}

/// Parse an ISO8601 timestamp as reported by the cluster API, eg "2024-03-01T10:22:33Z".
/// The source has one-second resolution; that is a documented precision floor for any event
/// derived from it.

pub fn parse_iso_timestamp(s: &str) -> Result<f64> {
    let t = DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow!("bad ISO8601 timestamp {s}: {e}"))?;
    Ok(micros_to_secs(t.timestamp_micros() as u64))
}

#[test]
fn test_parse_iso_timestamp() {
    // 2021-01-01T00:00:00Z is 1609459200 seconds after the epoch
    assert_eq!(parse_iso_timestamp("2021-01-01T00:00:00Z").unwrap(), 1609459200.0);
    assert_eq!(parse_iso_timestamp("2021-01-01T00:00:05+00:00").unwrap(), 1609459205.0);
    assert!(parse_iso_timestamp("yesterday-ish").is_err());
}

#[test]
fn test_micros_to_secs() {
    assert_eq!(micros_to_secs(1_500_000), 1.5);
    assert_eq!(micros_to_secs(0), 0.0);
}
