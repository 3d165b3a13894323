/// Event extraction from raw records.
///
/// Matching is substring containment on the raw message, intentionally permissive: the BEGIN/END
/// markers are magic strings designed to be unambiguous, so a fixed grammar would buy nothing.
/// The order of the returned records is the source's natural append order, which is
/// chronological for the host journal and the firmware console.
use crate::{CollectError, RawRecord};

/// All records whose message contains `event_name`, `entity_id`, and `extra_filter` if given.

pub fn matching<'a>(
    records: &'a [RawRecord],
    event_name: &str,
    entity_id: &str,
    extra_filter: Option<&str>,
) -> Vec<&'a RawRecord> {
    records
        .iter()
        .filter(|r| {
            r.message.contains(event_name)
                && r.message.contains(entity_id)
                && extra_filter.map_or(true, |f| r.message.contains(f))
        })
        .collect()
}

/// Like `matching`, but fail with `InsufficientEvents` unless at least `count` records match.
/// The error names the event, the entity and the filter so an operator can tell which phase of
/// the run could not be resolved.

pub fn extract<'a>(
    records: &'a [RawRecord],
    event_name: &str,
    entity_id: &str,
    count: usize,
    extra_filter: Option<&str>,
) -> Result<Vec<&'a RawRecord>, CollectError> {
    let matches = matching(records, event_name, entity_id, extra_filter);
    if matches.len() < count {
        return Err(CollectError::InsufficientEvents {
            event: event_name.to_string(),
            entity: entity_id.to_string(),
            extra: match extra_filter {
                Some(f) => format!(" (filter \"{f}\")"),
                None => String::new(),
            },
            needed: count,
            found: matches.len(),
        });
    }
    Ok(matches)
}

/// Timestamp of the most recent matching record.  The journal window can span earlier runs of
/// the same workload, so "the occurrence belonging to this run" is the last one.

pub fn last_timestamp(matches: &[&RawRecord]) -> f64 {
    matches.last().map(|r| r.timestamp_secs()).unwrap_or(0.0)
}

/// Start/end timestamps from the last two matching records, in order.  None if there are fewer
/// than two; the caller knows the event and entity names and owns the error report.

pub fn span_timestamps(matches: &[&RawRecord]) -> Option<(f64, f64)> {
    match matches {
        [.., start, end] => Some((start.timestamp_secs(), end.timestamp_secs())),
        _ => None,
    }
}

/// Check a recovered timestamp against a lower bound from an earlier phase of the same run.  A
/// violation means we matched a record from a previous run (or the anchor is off) and is fatal.

pub fn check_lower_bound(name: &str, ts: f64, lower_bound: Option<f64>) -> Result<(), CollectError> {
    if let Some(bound) = lower_bound {
        if ts <= bound {
            return Err(CollectError::OrderingViolation {
                start: "(lower bound)".to_string(),
                start_secs: bound,
                end: name.to_string(),
                end_secs: ts,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
fn recs(msgs: &[(&str, u64)]) -> Vec<RawRecord> {
    msgs.iter()
        .map(|(m, t)| RawRecord::new(m, *t, ustr::Ustr::from("test")))
        .collect()
}

#[test]
fn test_matching_is_substring_and_ordered() {
    let records = recs(&[
        ("PullImage image=app-1 begins", 100_000_000),
        ("something else entirely", 101_000_000),
        ("PullImage image=app-1 returns", 103_200_000),
        ("PullImage image=other-app returns", 104_000_000),
    ]);
    let m = matching(&records, "PullImage", "app-1", None);
    assert_eq!(m.len(), 2);
    assert!(m[0].timestamp_us < m[1].timestamp_us);
    assert_eq!(span_timestamps(&m), Some((100.0, 103.2)));

    let m = matching(&records, "PullImage", "app-1", Some("returns"));
    assert_eq!(m.len(), 1);
    assert_eq!(last_timestamp(&m), 103.2);
}

#[test]
fn test_span_timestamps_needs_two_records() {
    let records = recs(&[("PullImage image=app-1 begins", 100_000_000)]);
    let m = matching(&records, "PullImage", "app-1", None);
    assert_eq!(span_timestamps(&m), None);
    assert_eq!(span_timestamps(&[]), None);

    // With three matches the span is still the last two.
    let records = recs(&[
        ("PullImage image=app-1 stale", 90_000_000),
        ("PullImage image=app-1 begins", 100_000_000),
        ("PullImage image=app-1 returns", 103_200_000),
    ]);
    let m = matching(&records, "PullImage", "app-1", None);
    assert_eq!(span_timestamps(&m), Some((100.0, 103.2)));
}

#[test]
fn test_extract_error_context() {
    let records = recs(&[("PullImage image=app-1", 100_000_000)]);
    let err = extract(&records, "PullImage", "app-1", 2, Some("returns")).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("PullImage"));
    assert!(msg.contains("app-1"));
    assert!(msg.contains("returns"));
    match err {
        CollectError::InsufficientEvents { needed, found, .. } => {
            assert_eq!(needed, 2);
            assert_eq!(found, 0);
        }
        _ => panic!("expected InsufficientEvents"),
    }
}

#[test]
fn test_lower_bound() {
    assert!(check_lower_bound("EndX", 10.0, Some(9.0)).is_ok());
    assert!(check_lower_bound("EndX", 10.0, None).is_ok());
    assert!(check_lower_bound("EndX", 10.0, Some(10.0)).is_err());
    assert!(check_lower_bound("EndX", 10.0, Some(11.0)).is_err());
}
