/// Error taxonomy for the reconstruction engine.
///
/// There are exactly two classes plus timeouts, and they must never be conflated:
///
/// - `QueryEmpty` is *transient*: the log sources are eventually consistent and records may not
///   have been flushed or indexed yet.  It is produced only after a bounded retry loop has been
///   exhausted; "not enough records yet" inside the loop is loop state, not an error value.
///
/// - `InsufficientEvents`, `FrequencyMismatch`, `DuplicateEvent` and `OrderingViolation` are
///   *structural*: they indicate a logic or environment bug (missing marker, clock skew, a bad
///   anchor) and are fatal to the current run.  They are never retried.
///
/// - `Timeout` is distinct from `QueryEmpty`: it comes from a bounded readiness poll and carries
///   the elapsed time and the last observed state.
///
/// All of these propagate to the benchmark driver, which aborts the run; a partial timeline is
/// never exported as if it were complete.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no records for {query} after {attempts} attempts (last count {last_count}, needed {needed})")]
    QueryEmpty {
        query: String,
        attempts: u32,
        needed: usize,
        last_count: usize,
    },

    #[error("only {found} record(s) for event \"{event}\" on \"{entity}\"{extra} (needed {needed})")]
    InsufficientEvents {
        event: String,
        entity: String,
        /// Pre-formatted ` (filter "...")` when an extra filter was in play, else empty.
        extra: String,
        needed: usize,
        found: usize,
    },

    #[error("tick frequency changed during boot: first {first} Hz, last {last} Hz")]
    FrequencyMismatch { first: u64, last: u64 },

    #[error("event \"{name}\" appears more than once in the timeline")]
    DuplicateEvent { name: String },

    #[error("\"{end}\" at {end_secs}s does not follow \"{start}\" at {start_secs}s")]
    OrderingViolation {
        start: String,
        start_secs: f64,
        end: String,
        end_secs: f64,
    },

    #[error("timed out after {elapsed_secs:.1}s waiting for {what} (last state: {last_state})")]
    Timeout {
        what: String,
        elapsed_secs: f64,
        last_state: String,
    },
}

impl CollectError {
    /// True for errors that arose from eventual consistency rather than from a broken run.

    pub fn is_transient(&self) -> bool {
        matches!(self, CollectError::QueryEmpty { .. })
    }
}

#[test]
fn test_error_classes() {
    let e = CollectError::QueryEmpty {
        query: "PullImage for app-1".to_string(),
        attempts: 3,
        needed: 2,
        last_count: 1,
    };
    assert!(e.is_transient());
    assert!(e.to_string().contains("PullImage for app-1"));
    assert!(e.to_string().contains("3 attempts"));

    let e = CollectError::FrequencyMismatch { first: 1000, last: 1001 };
    assert!(!e.is_transient());
}
