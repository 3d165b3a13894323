/// Timeline assembly.
///
/// A timeline is the final product of one run: every recovered (name, timestamp) pair merged
/// into a single ascending sequence in the host wall-clock frame.  Assembly is the last line of
/// defence against a broken clock anchor: the caller declares which event pairs are semantically
/// ordered, and an inversion among them is fatal - it is a measurement bug, and retrying cannot
/// fix it.
///
/// Sorting is stable with ties broken by insertion order, so assembling the same input twice
/// yields identical output.  Ties do happen: the cluster API only has one-second resolution, so
/// no sub-second ordering is promised for events derived from it.
use crate::{CollectError, Event};

use std::collections::HashSet;

/// Start/end event names whose order must hold in the assembled timeline.

pub type OrderingConstraint<'a> = (&'a str, &'a str);

#[derive(Debug)]
pub struct Timeline {
    events: Vec<Event>,
}

impl Timeline {
    /// Sort, validate and freeze a run's events.  Fails with `DuplicateEvent` if a name occurs
    /// twice (each event is recovered exactly once per run) and with `OrderingViolation` if a
    /// declared constraint is inverted or collapsed.  Constraints whose events are absent are
    /// ignored: which events exist depends on the benchmark variant.

    pub fn assemble(
        mut events: Vec<Event>,
        constraints: &[OrderingConstraint],
    ) -> Result<Timeline, CollectError> {
        events.sort_by(|a, b| a.timestamp_secs.total_cmp(&b.timestamp_secs));

        let mut seen = HashSet::new();
        for ev in &events {
            if !seen.insert(ev.name) {
                return Err(CollectError::DuplicateEvent {
                    name: ev.name.to_string(),
                });
            }
        }

        let find = |name: &str| events.iter().find(|ev| ev.name.as_str() == name);
        for (start_name, end_name) in constraints {
            if let (Some(start), Some(end)) = (find(start_name), find(end_name)) {
                if end.timestamp_secs <= start.timestamp_secs {
                    return Err(CollectError::OrderingViolation {
                        start: start.name.to_string(),
                        start_secs: start.timestamp_secs,
                        end: end.name.to_string(),
                        end_secs: end.timestamp_secs,
                    });
                }
            }
        }

        Ok(Timeline { events })
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// CSV rows for the result sink: (run, event, timestamp-in-seconds), one row per event, in
    /// timeline order.  Six decimals carries the full microsecond precision of the sources that
    /// have it.

    pub fn rows(&self, run: i64) -> Vec<Vec<String>> {
        self.events
            .iter()
            .map(|ev| {
                vec![
                    run.to_string(),
                    ev.name.to_string(),
                    format!("{:.6}", ev.timestamp_secs),
                ]
            })
            .collect()
    }
}

#[cfg(test)]
fn ev(name: &str, ts: f64) -> Event {
    Event::new(name, ts)
}

#[test]
fn test_assemble_sorts_and_is_idempotent() {
    let unordered = vec![
        ev("EndImagePull", 103.2),
        ev("StartRunPodSandbox", 99.0),
        ev("StartImagePull", 100.0),
    ];
    let t1 = Timeline::assemble(unordered.clone(), &[]).unwrap();
    let names = t1.events().iter().map(|e| e.name.as_str()).collect::<Vec<&str>>();
    assert_eq!(names, ["StartRunPodSandbox", "StartImagePull", "EndImagePull"]);

    let t2 = Timeline::assemble(t1.events().to_vec(), &[]).unwrap();
    assert_eq!(t1.events(), t2.events());

    let t3 = Timeline::assemble(unordered, &[]).unwrap();
    assert_eq!(t1.events(), t3.events());
}

#[test]
fn test_assemble_tie_stability() {
    // The cluster API has one-second resolution; ties keep insertion order.
    let events = vec![ev("Initialized", 50.0), ev("PodScheduled", 50.0), ev("Ready", 51.0)];
    let t = Timeline::assemble(events, &[]).unwrap();
    let names = t.events().iter().map(|e| e.name.as_str()).collect::<Vec<&str>>();
    assert_eq!(names, ["Initialized", "PodScheduled", "Ready"]);
}

#[test]
fn test_assemble_rejects_inverted_constraint() {
    let events = vec![ev("StartVMStarted", 20.0), ev("EndVMStarted", 18.0)];
    let err = Timeline::assemble(events, &[("StartVMStarted", "EndVMStarted")]).unwrap_err();
    match err {
        CollectError::OrderingViolation { start, end, .. } => {
            assert_eq!(start, "StartVMStarted");
            assert_eq!(end, "EndVMStarted");
        }
        _ => panic!("expected OrderingViolation"),
    }

    // An absent constraint endpoint is not an error.
    let events = vec![ev("StartVMStarted", 20.0)];
    assert!(Timeline::assemble(events, &[("StartVMStarted", "EndVMStarted")]).is_ok());
}

#[test]
fn test_assemble_rejects_duplicates() {
    let events = vec![ev("AgentStarted", 1.0), ev("AgentStarted", 2.0)];
    match Timeline::assemble(events, &[]) {
        Err(CollectError::DuplicateEvent { name }) => assert_eq!(name, "AgentStarted"),
        _ => panic!("expected DuplicateEvent"),
    }
}

#[test]
fn test_rows_format() {
    let t = Timeline::assemble(vec![ev("StartImagePull", 100.0), ev("EndImagePull", 103.2)], &[])
        .unwrap();
    let rows = t.rows(4);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], ["4", "StartImagePull", "100.000000"]);
    assert_eq!(rows[1], ["4", "EndImagePull", "103.200000"]);
}
