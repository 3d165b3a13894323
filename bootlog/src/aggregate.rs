/// Aggregation of BEGIN/END sub-event pairs.
///
/// The guest pulls and unpacks image layers with per-layer BEGIN/END markers, and layers may be
/// processed concurrently depending on guest configuration.  Summing per-pair durations therefore
/// yields *work time*, not wall time: with three 2-second layers in flight at once the sum is
/// 6 seconds even though only 2 elapsed.  Callers that want wall time must use the enclosing
/// parent phase's own boundary markers.
use crate::{CollectError, Event, EventPair, RawRecord};

use itertools::Itertools;
use regex::Regex;
use std::sync::OnceLock;

/// Sum of `(end - start)` across same-kind sub-event pairs.  This is a work-time sum, not real
/// time, as some pairs may have run in parallel.

pub fn aggregate_serial(pairs: &[EventPair]) -> f64 {
    pairs.iter().map(|p| p.duration_secs()).sum()
}

/// Split a parent phase's wall-clock duration between two kinds of work in proportion to their
/// measured work-time.  This is used when the true split point inside the parent cannot be
/// observed (eg download vs unpack inside one opaque phase): we measure the work-time ratio and
/// assume the two kinds occupy all of the parent.  A deliberate approximation, not an exact
/// measurement.  With no measured work at all the split is even, which at least keeps the two
/// halves summing to the parent.

pub fn apportion_by_ratio(parent_duration: f64, work_a: f64, work_b: f64) -> (f64, f64) {
    let total = work_a + work_b;
    if total <= 0.0 {
        return (parent_duration / 2.0, parent_duration / 2.0);
    }
    let a = parent_duration * (work_a / total);
    (a, parent_duration - a)
}

fn digest_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"sha256:([a-f0-9]+)").unwrap())
}

/// Pair up per-layer BEGIN/END records by their layer digest.  Each BEGIN must have an END
/// carrying the same `sha256:` digest; a missing END is a structural failure (a marker was lost),
/// and an END that precedes its BEGIN trips the pair invariant.

pub fn digest_matched_pairs(
    records: &[RawRecord],
    begin_marker: &str,
    end_marker: &str,
) -> Result<Vec<EventPair>, CollectError> {
    let ordered = records
        .iter()
        .sorted_by_key(|r| r.timestamp_us)
        .collect::<Vec<&RawRecord>>();

    let digest_of =
        |message: &str| digest_regex().captures(message).map(|c| c[1].to_string());

    let mut pairs = vec![];
    for begin in &ordered {
        if !begin.message.contains(begin_marker) {
            continue;
        }
        let Some(digest) = digest_of(&begin.message) else {
            continue;
        };
        let end = ordered.iter().find(|r| {
            r.message.contains(end_marker) && digest_of(&r.message).as_deref() == Some(&digest)
        });
        let Some(end) = end else {
            return Err(CollectError::InsufficientEvents {
                event: end_marker.to_string(),
                entity: format!("sha256:{digest}"),
                extra: String::new(),
                needed: 1,
                found: 0,
            });
        };
        pairs.push(EventPair::new(
            Event::new(begin_marker, begin.timestamp_secs()),
            Event::new(end_marker, end.timestamp_secs()),
        )?);
    }
    Ok(pairs)
}

#[cfg(test)]
fn pair(start: f64, end: f64) -> EventPair {
    EventPair::new(Event::new("s", start), Event::new("e", end)).unwrap()
}

#[test]
fn test_aggregate_is_work_time_not_wall_time() {
    // Three sub-phases of 2 s each, fully concurrent: 6 s of work in 2 s of wall time.
    let pairs = [pair(10.0, 12.0), pair(10.0, 12.0), pair(10.0, 12.0)];
    assert_eq!(aggregate_serial(&pairs), 6.0);
    assert_eq!(aggregate_serial(&[]), 0.0);
}

#[test]
fn test_apportion_by_ratio() {
    let (a, b) = apportion_by_ratio(10.0, 3.0, 1.0);
    assert_eq!(a, 7.5);
    assert_eq!(b, 2.5);

    // The halves always reconstruct the parent.
    let (a, b) = apportion_by_ratio(7.3, 0.21, 0.37);
    assert!((a + b - 7.3).abs() < 1e-12);

    // No signal: even split.
    assert_eq!(apportion_by_ratio(4.0, 0.0, 0.0), (2.0, 2.0));
}

#[test]
fn test_digest_matched_pairs() {
    let src = ustr::Ustr::from("test");
    let records = vec![
        RawRecord::new("B3G1N: Pull Single Layer sha256:aa11", 100_000_000, src),
        RawRecord::new("B3G1N: Pull Single Layer sha256:bb22", 100_500_000, src),
        RawRecord::new("END: Pull Single Layer sha256:bb22", 101_500_000, src),
        RawRecord::new("END: Pull Single Layer sha256:aa11", 102_000_000, src),
    ];
    let pairs =
        digest_matched_pairs(&records, "B3G1N: Pull Single Layer", "END: Pull Single Layer")
            .unwrap();
    assert_eq!(pairs.len(), 2);
    // aa11 took 2 s, bb22 took 1 s; overlapping, so 3 s of work.
    assert_eq!(aggregate_serial(&pairs), 3.0);
}

#[test]
fn test_digest_missing_end_is_structural() {
    let src = ustr::Ustr::from("test");
    let records = vec![RawRecord::new(
        "B3G1N: Pull Single Layer sha256:aa11",
        100_000_000,
        src,
    )];
    let err = digest_matched_pairs(&records, "B3G1N: Pull Single Layer", "END: Pull Single Layer")
        .unwrap_err();
    assert!(err.to_string().contains("sha256:aa11"));
    assert!(!err.is_transient());
}
