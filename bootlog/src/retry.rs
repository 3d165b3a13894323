/// Bounded retry for queries against eventually-consistent log sources.
///
/// All three sources can legitimately return too few records right after the workload starts:
/// journald has not indexed the events yet, the cluster API has not seen the transition, the
/// serial file has not been flushed.  The fix is always the same: re-run the query a bounded
/// number of times with a fixed backoff, and only after exhaustion surface a transient
/// `QueryEmpty` carrying the last observed count so the caller can decide whether to abort the
/// run.
///
/// A fetch that errors (eg journalctl exiting nonzero while the unit rotates) is treated the same
/// as a fetch that returned nothing; the underlying error is logged, not propagated, because the
/// next attempt usually succeeds.
use crate::{CollectError, RawRecord};

use std::thread;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryBudget {
    fn default() -> RetryBudget {
        RetryBudget {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Run `fetch` until it yields at least `min_count` records, sleeping `budget.backoff` between
/// attempts.  `what` is a human-readable query description used in diagnostics.

pub fn query_with_retry<F>(
    what: &str,
    budget: RetryBudget,
    min_count: usize,
    mut fetch: F,
) -> Result<Vec<RawRecord>, CollectError>
where
    F: FnMut() -> anyhow::Result<Vec<RawRecord>>,
{
    let mut last_count = 0;
    for attempt in 1..=budget.attempts {
        match fetch() {
            Ok(records) if records.len() >= min_count => {
                return Ok(records);
            }
            Ok(records) => {
                last_count = records.len();
                debug!(
                    what,
                    attempt,
                    count = last_count,
                    needed = min_count,
                    "not enough records yet"
                );
            }
            Err(e) => {
                last_count = 0;
                debug!(what, attempt, error = %e, "query attempt failed");
            }
        }
        if attempt < budget.attempts {
            thread::sleep(budget.backoff);
        }
    }
    Err(CollectError::QueryEmpty {
        query: what.to_string(),
        attempts: budget.attempts,
        needed: min_count,
        last_count,
    })
}

#[cfg(test)]
fn test_budget() -> RetryBudget {
    RetryBudget {
        attempts: 3,
        backoff: Duration::ZERO,
    }
}

#[cfg(test)]
fn rec(msg: &str) -> RawRecord {
    RawRecord::new(msg, 0, ustr::Ustr::from("test"))
}

#[test]
fn test_retry_succeeds_on_later_attempt() {
    let mut calls = 0;
    let got = query_with_retry("two records", test_budget(), 2, || {
        calls += 1;
        if calls < 2 {
            Ok(vec![rec("a")])
        } else {
            Ok(vec![rec("a"), rec("b")])
        }
    })
    .unwrap();
    assert_eq!(calls, 2);
    assert_eq!(got.len(), 2);
}

#[test]
fn test_retry_exhaustion_reports_last_count() {
    let mut calls = 0;
    let err = query_with_retry("three records", test_budget(), 3, || {
        calls += 1;
        Ok(vec![rec("a")])
    })
    .unwrap_err();
    assert_eq!(calls, 3);
    match err {
        CollectError::QueryEmpty {
            attempts,
            needed,
            last_count,
            ..
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(needed, 3);
            assert_eq!(last_count, 1);
        }
        _ => panic!("expected QueryEmpty"),
    }
}

#[test]
fn test_retry_fetch_errors_are_transient() {
    let mut calls = 0;
    let got = query_with_retry("flaky source", test_budget(), 1, || {
        calls += 1;
        if calls == 1 {
            anyhow::bail!("journal rotated")
        }
        Ok(vec![rec("a")])
    })
    .unwrap();
    assert_eq!(got.len(), 1);
}

#[test]
fn test_retry_zero_min_count_returns_immediately() {
    let mut calls = 0;
    let got = query_with_retry("optional records", test_budget(), 0, || {
        calls += 1;
        Ok(vec![])
    })
    .unwrap();
    assert_eq!(calls, 1);
    assert!(got.is_empty());
}
