/// Per-run configuration, built once from the command line and passed down by value.  There is no
/// global mutable state anywhere in the driver; everything a collection run needs to know travels
/// in this object.
use bootlog::{JournalSource, RetryBudget, CONTAINERD_UNIT};

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Run index recorded in every CSV row of this run.
    pub run: i64,

    /// Where the CSV rows go.
    pub output: PathBuf,

    /// Namespace the workload pod lives in.
    pub namespace: String,

    /// Where journal records come from: the live journal or a captured dump.
    pub journal: JournalSource,

    /// Retry budget for each journal query.
    pub budget: RetryBudget,

    /// Deadline for the pod readiness wait.
    pub timeout: Duration,
}

impl RunConfig {
    pub fn new(
        run: i64,
        output: &str,
        namespace: &str,
        since: &str,
        journal_dump: Option<&str>,
        attempts: u32,
        timeout_mins: Option<u64>,
    ) -> RunConfig {
        let journal = match journal_dump {
            Some(path) => JournalSource::Dump {
                path: PathBuf::from(path),
            },
            None => JournalSource::Live {
                unit: CONTAINERD_UNIT.to_string(),
                since: since.to_string(),
            },
        };
        RunConfig {
            run,
            output: PathBuf::from(output),
            namespace: namespace.to_string(),
            journal,
            budget: RetryBudget {
                attempts,
                ..Default::default()
            },
            // The pod readiness wait always has a deadline at this layer; "no timeout" from the
            // command line just means a very long one.
            timeout: Duration::from_secs(timeout_mins.unwrap_or(24 * 60) * 60),
        }
    }
}
