/// Coarse startup timeline: the cluster's own view of the pod plus the host-side containerd
/// spans.  This is the cheap benchmark to run across many baselines; the per-source resolution
/// caveat applies, since pod condition transitions only carry whole seconds.
use crate::config::RunConfig;
use crate::driver;

use anyhow::Result;
use bootlog::{
    condition_events, container_id_from_pod, observation_start_event, wait_for_pod_ready, Event,
    OrderingConstraint, Timeline,
};
use std::time::Duration;
use tracing::info;

const CSV_HEADER: [&str; 3] = ["Run", "Event", "TimeStampSecs"];

pub fn run(cfg: &RunConfig, images: &[String], containers: &[String]) -> Result<()> {
    // The observation origin is recorded before anything else so every other event can be read
    // as an offset from it.
    let mut events = vec![observation_start_event()];

    let pod_name = driver::wait_for_first_pod(cfg)?;
    let conditions =
        wait_for_pod_ready(&cfg.namespace, &pod_name, Duration::from_secs(2), cfg.timeout)?;
    events.extend(condition_events(&conditions)?);
    info!(pod_name, conditions = conditions.len(), "pod ready");

    let (start_ps, end_ps) = driver::event_span(cfg, "RunPodSandbox", &pod_name, None)?;
    events.push(Event::new("StartRunPodSandbox", start_ps));
    events.push(Event::new("EndRunPodSandbox", end_ps));

    // Image pulls are bounded below by the sandbox: with a cVM the pull happens inside the guest.
    for image in images {
        let (start, end) = driver::event_span(cfg, "PullImage", image, Some(start_ps))?;
        let label = suffix_label(image);
        events.push(Event::new(&format!("StartImagePull_{label}"), start));
        events.push(Event::new(&format!("EndImagePull_{label}"), end));
    }

    for container in containers {
        let (start_cc, end_cc) =
            driver::event_span(cfg, "CreateContainer", container, Some(end_ps))?;
        let label = suffix_label(container);
        events.push(Event::new(&format!("StartCreateContainer_{label}"), start_cc));
        events.push(Event::new(&format!("EndCreateContainer_{label}"), end_cc));

        // StartContainer is logged against the runtime-level container id, not the name.
        let container_id = container_id_from_pod(&cfg.namespace, &pod_name, container)?;
        let (start_sc, end_sc) =
            driver::event_span(cfg, "StartContainer", &container_id, Some(end_cc))?;
        events.push(Event::new(&format!("StartStartContainer_{label}"), start_sc));
        events.push(Event::new(&format!("EndStartContainer_{label}"), end_sc));
    }

    let constraints = span_constraints(&events);
    let timeline = Timeline::assemble(events, &constraints)?;
    driver::export_timeline(cfg, &CSV_HEADER, &timeline)
}

/// One ordering constraint per generated Start*/End* pair.  Interned names live for the whole
/// run, so the constraint list can borrow them.

fn span_constraints(events: &[Event]) -> Vec<OrderingConstraint<'static>> {
    let mut constraints = vec![];
    for ev in events {
        if let Some(rest) = ev.name.as_str().strip_prefix("Start") {
            if rest.is_empty() {
                continue;
            }
            let end_name = ustr::Ustr::from(&format!("End{rest}"));
            if events.iter().any(|e| e.name == end_name) {
                constraints.push((ev.name.as_str(), end_name.as_str()));
            }
        }
    }
    constraints
}

/// Event-name suffix for a per-image or per-container span: the final path segment, with
/// characters that would be noise in a CSV column squeezed out.

fn suffix_label(entity: &str) -> String {
    entity
        .rsplit('/')
        .next()
        .unwrap_or(entity)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

#[test]
fn test_span_constraints_pair_generated_names() {
    let events = vec![
        Event::new("Start", 0.0),
        Event::new("Ready", 1.0),
        Event::new("StartCreateContainer_user-container", 2.0),
        Event::new("EndCreateContainer_user-container", 3.0),
        Event::new("StartStartContainer_user-container", 3.5),
        Event::new("EndStartContainer_user-container", 4.0),
        Event::new("StartImagePull_app", 2.5),
    ];
    let constraints = span_constraints(&events);
    assert_eq!(
        constraints,
        [
            (
                "StartCreateContainer_user-container",
                "EndCreateContainer_user-container"
            ),
            (
                "StartStartContainer_user-container",
                "EndStartContainer_user-container"
            ),
        ]
    );
}

#[test]
fn test_suffix_label() {
    assert_eq!(suffix_label("ghcr.io/acme/coco-helloworld-py"), "coco-helloworld-py");
    assert_eq!(suffix_label("user-container"), "user-container");
    assert_eq!(suffix_label("queue proxy:v1"), "queueproxyv1");
}
