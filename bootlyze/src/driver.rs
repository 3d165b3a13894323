/// Shared collection plumbing for the subcommands.
///
/// Every timestamp recovered from the journal goes through the same pipeline: fetch the source's
/// current record set, filter by substring, retry while too few records match (journald indexing
/// lags the workload by a few seconds), take the *last* match so earlier runs inside the query
/// window are ignored, and check the result against a lower bound from the preceding phase of
/// the run.  The subcommands differ only in which events they ask for and how they combine them.
use crate::config::RunConfig;

use anyhow::Result;
use bootlog::{
    check_lower_bound, last_timestamp, matching, query_with_retry, sandbox_id_from_record,
    span_timestamps, CollectError, JournalSource, RawRecord, RetryBudget, Timeline,
};
use cvmutils::ResultFile;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// All records matching the filters, after a bounded retry for at least `count` of them.

pub fn matching_records(
    journal: &JournalSource,
    budget: RetryBudget,
    event_name: &str,
    entity_id: &str,
    count: usize,
    extra_filter: Option<&str>,
) -> Result<Vec<RawRecord>, CollectError> {
    let what = format!("\"{event_name}\" for \"{entity_id}\"");
    query_with_retry(&what, budget, count, || {
        let records = journal.fetch()?;
        Ok(matching(&records, event_name, entity_id, extra_filter)
            .into_iter()
            .cloned()
            .collect())
    })
}

/// Timestamp of an event that occurs once per run: the last matching record.

pub fn event_ts(
    cfg: &RunConfig,
    event_name: &str,
    entity_id: &str,
    lower_bound: Option<f64>,
) -> Result<f64, CollectError> {
    let records = matching_records(&cfg.journal, cfg.budget, event_name, entity_id, 1, None)?;
    let matches = records.iter().collect::<Vec<&RawRecord>>();
    let ts = last_timestamp(&matches);
    check_lower_bound(event_name, ts, lower_bound)?;
    Ok(ts)
}

/// Start/end timestamps of a span event: the last two matching records, in order.  Containerd
/// logs both the dispatch and the completion of its operations with the same operation name, so
/// a completed span is exactly two records.

pub fn event_span(
    cfg: &RunConfig,
    event_name: &str,
    entity_id: &str,
    lower_bound: Option<f64>,
) -> Result<(f64, f64), CollectError> {
    let records = matching_records(&cfg.journal, cfg.budget, event_name, entity_id, 2, None)?;
    let matches = records.iter().collect::<Vec<&RawRecord>>();
    let (start, end) = span_timestamps(&matches).ok_or(CollectError::InsufficientEvents {
        event: event_name.to_string(),
        entity: entity_id.to_string(),
        extra: String::new(),
        needed: 2,
        found: matches.len(),
    })?;
    check_lower_bound(event_name, start, lower_bound)?;
    Ok((start, end))
}

/// The sandbox id the VM runtime uses for this pod, from the closing RunPodSandbox record.

pub fn sandbox_id(cfg: &RunConfig, pod_name: &str) -> Result<String> {
    let records = matching_records(
        &cfg.journal,
        cfg.budget,
        "RunPodSandbox",
        pod_name,
        1,
        Some("returns sandbox id"),
    )?;
    let matches = records.iter().collect::<Vec<&RawRecord>>();
    let last = matches.last().ok_or(CollectError::InsufficientEvents {
        event: "RunPodSandbox".to_string(),
        entity: pod_name.to_string(),
        extra: " (filter \"returns sandbox id\")".to_string(),
        needed: 1,
        found: 0,
    })?;
    Ok(sandbox_id_from_record(last)?)
}

/// Wait for the workload pod to appear in the namespace and return its name.  The driver does not
/// deploy anything itself, so at attach time the pod may not have been scheduled yet.

pub fn wait_for_first_pod(cfg: &RunConfig) -> Result<String, CollectError> {
    let started = Instant::now();
    loop {
        match bootlog::pod_names_in_namespace(&cfg.namespace) {
            Ok(pods) if !pods.is_empty() => {
                return Ok(pods[0].clone());
            }
            _ => {}
        }
        if started.elapsed() >= cfg.timeout {
            return Err(CollectError::Timeout {
                what: format!("a pod to appear in namespace {}", cfg.namespace),
                elapsed_secs: started.elapsed().as_secs_f64(),
                last_state: "no pods".to_string(),
            });
        }
        thread::sleep(Duration::from_secs(1));
    }
}

/// Write one run's assembled timeline.  A failed run never reaches this point, so the file only
/// ever holds complete timelines.

pub fn export_timeline(cfg: &RunConfig, header: &[&str], timeline: &Timeline) -> Result<()> {
    let mut out = ResultFile::create(&cfg.output, header)?;
    for row in timeline.rows(cfg.run) {
        out.append(&row)?;
    }
    info!(
        output = %cfg.output.display(),
        events = timeline.events().len(),
        "timeline exported"
    );
    Ok(())
}

#[cfg(test)]
fn dump_config(dir: &std::path::Path, dump: &str) -> RunConfig {
    let dump_path = dir.join("journal.json");
    std::fs::write(&dump_path, dump).unwrap();
    RunConfig::new(
        4,
        dir.join("out.csv").to_str().unwrap(),
        "default",
        bootlog::DEFAULT_SINCE,
        dump_path.to_str(),
        1,
        Some(1),
    )
}

#[test]
fn test_dump_to_csv_end_to_end() {
    // Two PullImage records in a captured journal dump must come out as exactly two ordered CSV
    // rows with second-precision timestamps preserved.
    let dir = std::env::temp_dir().join(format!("bootlyze-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cfg = dump_config(
        &dir,
        concat!(
            "{\"MESSAGE\":\"PullImage image=app-1 begins\",\"__REALTIME_TIMESTAMP\":\"100000000\"}\n",
            "not json\n",
            "{\"MESSAGE\":\"PullImage image=app-1 returns\",\"__REALTIME_TIMESTAMP\":\"103200000\"}\n",
        ),
    );

    let (start, end) = event_span(&cfg, "PullImage", "app-1", None).unwrap();
    assert_eq!((start, end), (100.0, 103.2));

    let timeline = Timeline::assemble(
        vec![
            bootlog::Event::new("StartImagePull", start),
            bootlog::Event::new("EndImagePull", end),
        ],
        &[("StartImagePull", "EndImagePull")],
    )
    .unwrap();
    export_timeline(&cfg, &["Run", "Event", "TimeStampSecs"], &timeline).unwrap();

    let written = std::fs::read_to_string(&cfg.output).unwrap();
    let lines = written.lines().collect::<Vec<&str>>();
    assert_eq!(
        lines,
        [
            "Run,Event,TimeStampSecs",
            "4,StartImagePull,100.000000",
            "4,EndImagePull,103.200000",
        ]
    );
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_event_ts_takes_last_occurrence_and_checks_bound() {
    let dir = std::env::temp_dir().join(format!("bootlyze-last-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    // A stale record from an earlier run sits inside the query window.
    let cfg = dump_config(
        &dir,
        concat!(
            "{\"MESSAGE\":\"Agent started\",\"__REALTIME_TIMESTAMP\":\"50000000\"}\n",
            "{\"MESSAGE\":\"Agent started\",\"__REALTIME_TIMESTAMP\":\"200000000\"}\n",
        ),
    );
    assert_eq!(
        event_ts(&cfg, "Agent started", "Agent started", Some(100.0)).unwrap(),
        200.0
    );
    // If even the last occurrence predates the bound, the run is broken.
    assert!(event_ts(&cfg, "Agent started", "Agent started", Some(300.0)).is_err());
    std::fs::remove_dir_all(&dir).unwrap();
}
