/// Collapsing duplicate occurrences of the same named event.
///
/// Two duplication sources are known in the firmware log.  A diagnostic self-test pass re-emits
/// the same BEGIN/END markers before real execution; those lines carry their own marker and are
/// dropped wholesale by the firmware parser before we get here.  Some phases are also genuinely
/// invoked more than once (PeiCore re-announces itself, the core dispatcher runs in several
/// stages); for those, which BEGIN and which END are meaningful is an explicit per-name policy,
/// never inferred from the data.
use crate::RawRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrencePolicy {
    First,
    Last,
}

/// Select one record from the (already filtered, append-ordered) occurrences of an event.

pub fn select_occurrence<'a>(
    policy: OccurrencePolicy,
    occurrences: &[&'a RawRecord],
) -> Option<&'a RawRecord> {
    match policy {
        OccurrencePolicy::First => occurrences.first().copied(),
        OccurrencePolicy::Last => occurrences.last().copied(),
    }
}

pub fn first_occurrence<'a>(occurrences: &[&'a RawRecord]) -> Option<&'a RawRecord> {
    select_occurrence(OccurrencePolicy::First, occurrences)
}

pub fn last_occurrence<'a>(occurrences: &[&'a RawRecord]) -> Option<&'a RawRecord> {
    select_occurrence(OccurrencePolicy::Last, occurrences)
}

/// Which BEGIN and which END to keep when a phase shows up more than once.

#[derive(Debug, Clone, Copy)]
pub struct PairPolicy {
    pub begin: OccurrencePolicy,
    pub end: OccurrencePolicy,
}

/// The policy table for firmware phases.  PeiCore re-emits its BEGIN during hand-off and the
/// core dispatcher is re-entered at later stages of execution; in both cases only the first
/// invocation is on the boot's critical path, so the first BEGIN/END pair is kept.  For phases
/// expected to occur once the default pairs the first BEGIN with the last END, so that a phase
/// that internally re-enters still spans its whole duration.

pub fn pair_policy(phase: &str) -> PairPolicy {
    match phase {
        "PeiCore" | "CoreDispatcher" => PairPolicy {
            begin: OccurrencePolicy::First,
            end: OccurrencePolicy::First,
        },
        _ => PairPolicy {
            begin: OccurrencePolicy::First,
            end: OccurrencePolicy::Last,
        },
    }
}

#[cfg(test)]
fn recs(msgs: &[&str]) -> Vec<RawRecord> {
    msgs.iter()
        .enumerate()
        .map(|(i, m)| RawRecord::new(m, i as u64 * 1_000_000, ustr::Ustr::from("test")))
        .collect()
}

#[test]
fn test_occurrence_policies_are_deterministic() {
    let records = recs(&["decoy BEGIN", "real BEGIN", "late BEGIN"]);
    let occurrences = records.iter().collect::<Vec<&RawRecord>>();

    assert_eq!(first_occurrence(&occurrences).unwrap().message, "decoy BEGIN");
    assert_eq!(last_occurrence(&occurrences).unwrap().message, "late BEGIN");
    assert_eq!(
        select_occurrence(OccurrencePolicy::First, &occurrences).unwrap().message,
        first_occurrence(&occurrences).unwrap().message
    );
    assert!(first_occurrence(&[]).is_none());
}

#[test]
fn test_decoy_excluded_by_filtering_not_position() {
    // The self-test decoy emits the same markers; it is excluded by dropping its tagged lines
    // up front, after which the first occurrence is the real one.
    let records = recs(&["G3N3S1S PeiCore BEGIN", "PeiCore BEGIN", "PeiCore BEGIN"]);
    let occurrences = records
        .iter()
        .filter(|r| !r.message.contains("G3N3S1S"))
        .collect::<Vec<&RawRecord>>();
    let chosen = select_occurrence(pair_policy("PeiCore").begin, &occurrences).unwrap();
    assert_eq!(chosen.timestamp_us, 1_000_000);
}
