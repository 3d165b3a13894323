/// The cluster API source.
///
/// Unlike the journal and the firmware console, the cluster API is not a log: it is a
/// point-in-time snapshot of a pod's status conditions.  Each condition carries a
/// `lastTransitionTime` with one-second resolution, which is the precision floor for every event
/// recovered from this source - ties against journal-derived events at that resolution are
/// expected and accepted.
use crate::{CollectError, Event, RawRecord};

use anyhow::{anyhow, bail, Result};
use cvmutils::{now_epoch_secs, parse_iso_timestamp, run_with_timeout};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// The condition `reason` that signals a pod has stopped making progress and its containers are
/// gone or going: used to detect termination during throughput experiments.

pub const TERMINATING_REASON: &str = "ContainersNotReady";

#[derive(Debug, Clone, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub cond_type: String,
    pub status: String,
    #[serde(rename = "lastTransitionTime", default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Parse the condition array as printed by the cluster CLI's jsonpath output.

pub fn parse_conditions(text: &str) -> Result<Vec<PodCondition>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        // A pod that has not been scheduled yet has no conditions at all.
        return Ok(vec![]);
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// A pod is ready when every condition reports "True".

pub fn is_ready(conditions: &[PodCondition]) -> bool {
    !conditions.is_empty() && conditions.iter().all(|c| c.status == "True")
}

pub fn is_terminating(conditions: &[PodCondition]) -> bool {
    conditions
        .iter()
        .any(|c| c.reason.as_deref() == Some(TERMINATING_REASON))
}

/// The timestamp at which the pod turned Ready, as recorded by the cluster itself.  We report
/// the cluster's own transition time rather than the time we noticed it, so a slow poll loop
/// does not distort the measurement.

pub fn ready_timestamp_secs(conditions: &[PodCondition]) -> Result<f64> {
    let cond = conditions
        .iter()
        .find(|c| c.cond_type == "Ready")
        .ok_or_else(|| anyhow!("no Ready condition in pod status"))?;
    let t = cond
        .last_transition_time
        .as_deref()
        .ok_or_else(|| anyhow!("Ready condition carries no transition time"))?;
    parse_iso_timestamp(t)
}

/// One event per condition that has transitioned, named by the condition type.

pub fn condition_events(conditions: &[PodCondition]) -> Result<Vec<Event>> {
    let mut events = vec![];
    for cond in conditions {
        if let Some(t) = cond.last_transition_time.as_deref() {
            events.push(Event::new(&cond.cond_type, parse_iso_timestamp(t)?));
        }
    }
    Ok(events)
}

fn kubectl(args: &str) -> Result<String> {
    run_with_timeout(&format!("kubectl {args}"), Duration::from_secs(30))
}

pub fn get_pod_conditions(namespace: &str, pod_name: &str) -> Result<Vec<PodCondition>> {
    let out = kubectl(&format!(
        "get pod -n {namespace} {pod_name} -o jsonpath='{{..status.conditions}}'"
    ))?;
    parse_conditions(&out)
}

pub fn pod_names_in_namespace(namespace: &str) -> Result<Vec<String>> {
    let out = kubectl(&format!(
        "get pods -n {namespace} -o jsonpath='{{.items[*].metadata.name}}'"
    ))?;
    Ok(out.split_whitespace().map(|s| s.to_string()).collect())
}

/// The runtime-level id of a named container in a pod.  Containerd logs StartContainer against
/// this id, not against the container name, so it is needed to recover those spans.

pub fn container_id_from_pod(
    namespace: &str,
    pod_name: &str,
    container_name: &str,
) -> Result<String> {
    let out = kubectl(&format!(
        "get pod -n {namespace} {pod_name} -o jsonpath='{{..status.containerStatuses[?(@.name==\"{container_name}\")].containerID}}'"
    ))?;
    parse_container_id(&out, container_name)
}

/// The cluster reports the id as a runtime-prefixed URI, eg "containerd://<hex>".

fn parse_container_id(text: &str, container_name: &str) -> Result<String> {
    let id = text.trim();
    let id = id.strip_prefix("containerd://").unwrap_or(id);
    if id.is_empty() {
        bail!("no container id for container {container_name}");
    }
    Ok(id.to_string())
}

/// Poll the pod's conditions until it is ready, and return the final condition set.  The sleep
/// interval is fixed; the deadline is mandatory at this layer - an unbounded wait is only ever a
/// driver-level decision, never a library one.

pub fn wait_for_pod_ready(
    namespace: &str,
    pod_name: &str,
    poll_interval: Duration,
    timeout: Duration,
) -> Result<Vec<PodCondition>, CollectError> {
    let started = Instant::now();
    let mut last_state = "unknown".to_string();
    loop {
        match get_pod_conditions(namespace, pod_name) {
            Ok(conditions) if is_ready(&conditions) => {
                return Ok(conditions);
            }
            Ok(conditions) => {
                last_state = conditions
                    .iter()
                    .map(|c| format!("{}={}", c.cond_type, c.status))
                    .collect::<Vec<String>>()
                    .join(",");
                if last_state.is_empty() {
                    last_state = "no conditions yet".to_string();
                }
            }
            Err(e) => {
                // The API server can be briefly unreachable while the node is loaded; that is
                // the same kind of transient as an empty condition list.
                debug!(pod_name, error = %e, "condition query failed");
            }
        }
        if started.elapsed() >= timeout {
            return Err(CollectError::Timeout {
                what: format!("pod {pod_name} to become Ready"),
                elapsed_secs: started.elapsed().as_secs_f64(),
                last_state,
            });
        }
        thread::sleep(poll_interval);
    }
}

fn sandbox_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"returns sandbox id \\?"([a-zA-Z0-9]+)\\?""#).unwrap())
}

/// The sandbox id is how the VM runtime names the pod in its own log lines.  It is reported in
/// the closing record of the sandbox-creation event, embedded in an escaped-JSON message.

pub fn sandbox_id_from_record(record: &RawRecord) -> Result<String> {
    match sandbox_id_regex().captures(&record.message) {
        Some(caps) => Ok(caps[1].to_string()),
        None => bail!("no sandbox id in record: {}", record.message),
    }
}

/// A "Start" event for the moment the driver began observing, used as the origin row of coarse
/// startup timelines.

pub fn observation_start_event() -> Event {
    Event::new("Start", now_epoch_secs())
}

#[cfg(test)]
const READY_CONDS: &str = r#"[
  {"type":"Initialized","status":"True","lastTransitionTime":"2021-01-01T00:00:00Z"},
  {"type":"Ready","status":"True","lastTransitionTime":"2021-01-01T00:00:10Z"},
  {"type":"ContainersReady","status":"True","lastTransitionTime":"2021-01-01T00:00:10Z"},
  {"type":"PodScheduled","status":"True","lastTransitionTime":"2021-01-01T00:00:00Z"}
]"#;

#[test]
fn test_conditions_ready() {
    let conds = parse_conditions(READY_CONDS).unwrap();
    assert!(is_ready(&conds));
    assert!(!is_terminating(&conds));
    assert_eq!(ready_timestamp_secs(&conds).unwrap(), 1609459210.0);

    let events = condition_events(&conds).unwrap();
    assert_eq!(events.len(), 4);
    assert_eq!(events[1].name.as_str(), "Ready");
    assert_eq!(events[1].timestamp_secs, 1609459210.0);
}

#[test]
fn test_conditions_not_ready() {
    let text = r#"[
      {"type":"Ready","status":"False","reason":"ContainersNotReady",
       "lastTransitionTime":"2021-01-01T00:00:05Z"},
      {"type":"PodScheduled","status":"True","lastTransitionTime":"2021-01-01T00:00:00Z"}
    ]"#;
    let conds = parse_conditions(text).unwrap();
    assert!(!is_ready(&conds));
    assert!(is_terminating(&conds));

    // No conditions at all: not ready, not an error.
    let conds = parse_conditions("  ").unwrap();
    assert!(conds.is_empty());
    assert!(!is_ready(&conds));
}

#[test]
fn test_container_id_parsing() {
    assert_eq!(
        parse_container_id("containerd://70562bd1849c\n", "user-container").unwrap(),
        "70562bd1849c"
    );
    // Some runtimes report the bare id.
    assert_eq!(
        parse_container_id("70562bd1849c", "user-container").unwrap(),
        "70562bd1849c"
    );
    assert!(parse_container_id("  ", "user-container").is_err());
}

#[test]
fn test_sandbox_id() {
    let r = RawRecord::new(
        r#"RunPodSandbox for &PodSandboxMetadata{...} returns sandbox id \"70562bd1849c\""#,
        0,
        ustr::Ustr::from("test"),
    );
    assert_eq!(sandbox_id_from_record(&r).unwrap(), "70562bd1849c");

    let r = RawRecord::new("RunPodSandbox begins", 0, ustr::Ustr::from("test"));
    assert!(sandbox_id_from_record(&r).is_err());
}
