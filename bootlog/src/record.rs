/// Raw records and events.
///
/// A `RawRecord` is what a log source hands back from one query: a free-text message plus the
/// host-side timestamp, if the source has one.  Records are owned transiently by a single query
/// call and are never persisted.
///
/// An `Event` is the unit exported to the timeline: a named milestone with a timestamp in
/// floating epoch seconds, immutable once created.  Event names are interned since the same few
/// dozen names recur across runs.
use crate::CollectError;

use cvmutils::micros_to_secs;
use ustr::Ustr;

#[derive(Debug, Clone)]
pub struct RawRecord {
    pub message: String,

    /// Microseconds since the epoch, in the host clock domain.  Zero for sources that carry no
    /// wall clock (the firmware console); such records are meaningful in append order only.
    pub timestamp_us: u64,

    /// Which source produced the record, eg "journal:containerd".
    pub source: Ustr,
}

impl RawRecord {
    pub fn new(message: &str, timestamp_us: u64, source: Ustr) -> RawRecord {
        RawRecord {
            message: message.to_string(),
            timestamp_us,
            source,
        }
    }

    pub fn timestamp_secs(&self) -> f64 {
        micros_to_secs(self.timestamp_us)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub name: Ustr,
    pub timestamp_secs: f64,
}

impl Event {
    pub fn new(name: &str, timestamp_secs: f64) -> Event {
        Event {
            name: Ustr::from(name),
            timestamp_secs,
        }
    }
}

/// A matched BEGIN/END pair.  The constructor enforces the pair invariant: an end that does not
/// strictly follow its start means the clock anchor (or the marker matching) is broken, and that
/// must never silently turn into a negative duration.

#[derive(Debug, Clone, Copy)]
pub struct EventPair {
    pub start: Event,
    pub end: Event,
}

impl EventPair {
    pub fn new(start: Event, end: Event) -> Result<EventPair, CollectError> {
        if end.timestamp_secs <= start.timestamp_secs {
            return Err(CollectError::OrderingViolation {
                start: start.name.to_string(),
                start_secs: start.timestamp_secs,
                end: end.name.to_string(),
                end_secs: end.timestamp_secs,
            });
        }
        Ok(EventPair { start, end })
    }

    pub fn duration_secs(&self) -> f64 {
        self.end.timestamp_secs - self.start.timestamp_secs
    }
}

#[test]
fn test_event_pair_invariant() {
    let a = Event::new("StartX", 10.0);
    let b = Event::new("EndX", 12.5);
    let p = EventPair::new(a, b).unwrap();
    assert_eq!(p.duration_secs(), 2.5);

    // end == start is as illegal as end < start
    assert!(EventPair::new(a, Event::new("EndX", 10.0)).is_err());
    match EventPair::new(b, a) {
        Err(CollectError::OrderingViolation { start, end, .. }) => {
            assert_eq!(start, "EndX");
            assert_eq!(end, "StartX");
        }
        _ => panic!("expected an ordering violation"),
    }
}

#[test]
fn test_record_timestamp() {
    let r = RawRecord::new("hi", 100_000_000, Ustr::from("test"));
    assert_eq!(r.timestamp_secs(), 100.0);
}
