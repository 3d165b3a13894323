/// The firmware console source.
///
/// The firmware can only talk through the serial console, which the VM launcher redirects to a
/// file on the host.  Instrumented firmware builds print one marker line per phase boundary:
///
/// ```text
/// <Phase> CSG-M4G1C BEGIN (ticks): <uint> [Freq: <uint>]
/// <Phase> CSG-M4G1C END (ticks): <uint> [Freq: <uint>]
/// ```
///
/// The magic token makes the lines unambiguously greppable; every other line in the file is
/// ignored.  The `Freq` annotation appears only on the first and last marker lines of a boot.
/// There is no wall clock in any of this - only the tick counter - so the phases become real
/// timestamps by anchoring the END of firmware execution to the guest kernel's start time as
/// observed from the host (see the clock module).
///
/// Known quirks handled here, all rooted in how the firmware actually behaves:
///
/// - a diagnostic self-test pass re-emits the same markers tagged `G3N3S1S` before real
///   execution; those lines are dropped;
/// - `PeiCore` and `CoreDispatcher` emit extra BEGIN/END markers from re-entries; the explicit
///   per-phase policy table in the dedup module picks the meaningful pair;
/// - `DxeMain` starts before its timer library is initialised, so its BEGIN reports zero ticks;
///   its start is clamped to the end of `DxeLoadCore`, the phase that hands over to it;
/// - per-driver dispatch lines share the phase grammar but are noise at this granularity and
///   are skipped;
/// - the many `*Verify*` phases (blob measurement and signature checks) are folded into a single
///   work-time interval, since individually they are too short to plot and may interleave.
use crate::clock::ClockAnchor;
use crate::dedup::pair_policy;
use crate::{CollectError, Event};

use regex::Regex;
use std::sync::OnceLock;

/// Marker of phase-boundary lines.

pub const BOOT_MAGIC: &str = "CSG-M4G1C";

/// Marker of the diagnostic self-test pass.

pub const SELF_TEST_MAGIC: &str = "G3N3S1S";

/// Guard against the zero-tick readings emitted before the firmware's timer is up.

const TIMER_EPSILON_SECS: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct FirmwareLine {
    pub phase: String,
    pub is_begin: bool,
    pub ticks: u64,
    pub frequency_hz: Option<u64>,
    pub is_self_test: bool,
    pub is_driver: bool,
}

fn ticks_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(ticks\): ([0-9]+)").unwrap())
}

fn freq_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Freq: ([0-9]+)").unwrap())
}

fn phase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z][A-Za-z-]*)").unwrap())
}

/// Extract the marker lines from a serial console capture, in file order.  Anything that does
/// not carry the magic, a BEGIN/END tag, and a tick reading is ignored.

pub fn parse_serial_log(text: &str) -> Vec<FirmwareLine> {
    let mut lines = vec![];
    for line in text.lines() {
        if !line.contains(BOOT_MAGIC) {
            continue;
        }
        let is_begin = line.contains("BEGIN");
        if !is_begin && !line.contains("END") {
            continue;
        }
        let Some(ticks) = ticks_regex()
            .captures(line)
            .and_then(|c| c[1].parse::<u64>().ok())
        else {
            continue;
        };
        let frequency_hz = freq_regex()
            .captures(line)
            .and_then(|c| c[1].parse::<u64>().ok());
        let Some(phase) = phase_regex().captures(line).map(|c| c[1].to_string()) else {
            continue;
        };
        lines.push(FirmwareLine {
            phase,
            is_begin,
            ticks,
            frequency_hz,
            is_self_test: line.contains(SELF_TEST_MAGIC),
            is_driver: line.contains("driver"),
        });
    }
    lines
}

/// Reconstruct the firmware timeline: the overall boot span plus one Start/End pair per phase,
/// every timestamp anchored to `guest_kernel_start_secs`.  Returns the anchor too so callers can
/// log the translation or convert further readings.

pub fn boot_events(
    lines: &[FirmwareLine],
    guest_kernel_start_secs: f64,
) -> Result<(ClockAnchor, Vec<Event>), CollectError> {
    let (first, last) = match (lines.first(), lines.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(CollectError::InsufficientEvents {
                event: "firmware boot markers".to_string(),
                entity: BOOT_MAGIC.to_string(),
                extra: String::new(),
                needed: 2,
                found: lines.len(),
            });
        }
    };
    let Some(frequency_hz) = first.frequency_hz else {
        return Err(CollectError::InsufficientEvents {
            event: "tick frequency annotation".to_string(),
            entity: first.phase.clone(),
            extra: String::new(),
            needed: 1,
            found: 0,
        });
    };
    let anchor = ClockAnchor::from_boundaries(
        first.ticks,
        frequency_hz,
        last.ticks,
        last.frequency_hz,
        guest_kernel_start_secs,
    )?;

    let mut events = vec![
        Event::new("StartOVMFBoot", anchor.to_wallclock(first.ticks)),
        Event::new("EndOVMFBoot", guest_kernel_start_secs),
    ];

    // The self-test pass re-runs the early phases with the same markers; only the real pass
    // counts.
    let lines = lines
        .iter()
        .filter(|l| !l.is_self_test)
        .collect::<Vec<&FirmwareLine>>();

    // Distinct phases, in order of first BEGIN.  Driver dispatch lines are noise.
    let mut phases: Vec<&str> = vec![];
    for line in &lines {
        if line.is_begin && !line.is_driver && !phases.contains(&line.phase.as_str()) {
            phases.push(&line.phase);
        }
    }

    // Pair every phase up, deferring emission so DxeMain can be clamped against DxeLoadCore.
    let mut spans: Vec<(&str, f64, f64)> = vec![];
    for phase in phases {
        let select = |want_begin: bool, policy| {
            let occurrences = lines
                .iter()
                .filter(|l| l.phase == phase && l.is_begin == want_begin)
                .copied()
                .collect::<Vec<&FirmwareLine>>();
            select_occurrence_line(policy, &occurrences)
        };
        let policy = pair_policy(phase);
        let begin = select(true, policy.begin);
        let end = select(false, policy.end);
        let (Some(begin), Some(end)) = (begin, end) else {
            return Err(CollectError::InsufficientEvents {
                event: format!("OVMF{phase} BEGIN/END markers"),
                entity: phase.to_string(),
                extra: String::new(),
                needed: 2,
                found: begin.is_some() as usize + end.is_some() as usize,
            });
        };
        spans.push((
            phase,
            anchor.to_wallclock(begin.ticks),
            anchor.to_wallclock(end.ticks),
        ));
    }

    let dxe_load_core_end = spans
        .iter()
        .find(|(phase, _, _)| *phase == "DxeLoadCore")
        .map(|(_, _, end)| *end);

    let mut verify_start = f64::INFINITY;
    let mut verify_work = 0.0;
    for (phase, mut start, end) in spans {
        if phase.contains("Verify") {
            verify_start = verify_start.min(start);
            verify_work += end - start;
            continue;
        }
        if phase == "DxeMain" {
            // Zero-tick BEGIN, see module comment.
            if let Some(load_end) = dxe_load_core_end {
                start = start.max(load_end);
            }
            start += TIMER_EPSILON_SECS;
        }
        events.push(Event::new(&format!("StartOVMF{phase}"), start));
        events.push(Event::new(&format!("EndOVMF{phase}"), end));
    }
    if verify_start.is_finite() {
        events.push(Event::new("StartOVMFVerify", verify_start));
        events.push(Event::new("EndOVMFVerify", verify_start + verify_work));
    }

    Ok((anchor, events))
}

fn select_occurrence_line<'a>(
    policy: crate::dedup::OccurrencePolicy,
    occurrences: &[&'a FirmwareLine],
) -> Option<&'a FirmwareLine> {
    match policy {
        crate::dedup::OccurrencePolicy::First => occurrences.first().copied(),
        crate::dedup::OccurrencePolicy::Last => occurrences.last().copied(),
    }
}

#[cfg(test)]
fn find_ts(events: &[Event], name: &str) -> f64 {
    events
        .iter()
        .find(|e| e.name.as_str() == name)
        .unwrap_or_else(|| panic!("missing event {name}"))
        .timestamp_secs
}

#[cfg(test)]
const SYNTHETIC_LOG: &str = "\
SecMain CSG-M4G1C BEGIN (ticks): 1000000 Freq: 1000000
noise line without any marker
SecMain CSG-M4G1C END (ticks): 2000000
PeiCore CSG-M4G1C BEGIN (ticks): 2000000
PeiCore CSG-M4G1C BEGIN (ticks): 2100000
DxeLoadCore CSG-M4G1C BEGIN (ticks): 2500000
DxeLoadCore CSG-M4G1C END (ticks): 3000000
DxeMain CSG-M4G1C BEGIN (ticks): 0
SecVerify CSG-M4G1C BEGIN (ticks): 3200000
SecVerify CSG-M4G1C END (ticks): 3400000
SigVerify CSG-M4G1C BEGIN (ticks): 3300000
SigVerify CSG-M4G1C END (ticks): 3500000
CoreDispatcher CSG-M4G1C BEGIN (ticks): 4000000
CoreDispatcher CSG-M4G1C END (ticks): 4500000
CoreDispatcher CSG-M4G1C BEGIN (ticks): 4600000
CoreDispatcher CSG-M4G1C END (ticks): 4800000
DxeMain CSG-M4G1C END (ticks): 5000000
PeiCore CSG-M4G1C END (ticks): 5000000
FvbDxe driver CSG-M4G1C BEGIN (ticks): 4650000
FvbDxe driver CSG-M4G1C END (ticks): 4700000
DxeMain CSG-M4G1C END (ticks): 6000000 Freq: 1000000
";

#[test]
fn test_parse_serial_log() {
    let lines = parse_serial_log(SYNTHETIC_LOG);
    assert_eq!(lines.len(), 20);
    assert_eq!(lines[0].phase, "SecMain");
    assert!(lines[0].is_begin);
    assert_eq!(lines[0].frequency_hz, Some(1_000_000));
    assert_eq!(lines[1].frequency_hz, None);
    assert!(lines.last().unwrap().frequency_hz.is_some());
}

#[test]
fn test_boot_events_round_trip() {
    // 1 MHz counter, ticks 1e6..6e6: the whole boot took exactly 5 s, so with the guest kernel
    // starting at t=1000 the boot must start at exactly 995.
    let lines = parse_serial_log(SYNTHETIC_LOG);
    let (anchor, events) = boot_events(&lines, 1000.0).unwrap();
    assert_eq!(anchor.tick_frequency_hz, 1_000_000);
    assert_eq!(find_ts(&events, "StartOVMFBoot"), 995.0);
    assert_eq!(find_ts(&events, "EndOVMFBoot"), 1000.0);

    assert_eq!(find_ts(&events, "StartOVMFSecMain"), 995.0);
    assert_eq!(find_ts(&events, "EndOVMFSecMain"), 996.0);

    // PeiCore: first BEGIN wins over the re-announcement at 2.1e6.
    assert_eq!(find_ts(&events, "StartOVMFPeiCore"), 996.0);

    // CoreDispatcher: first invocation only.
    assert_eq!(find_ts(&events, "StartOVMFCoreDispatcher"), 998.0);
    assert_eq!(find_ts(&events, "EndOVMFCoreDispatcher"), 998.5);

    // DxeMain's zero-tick BEGIN is clamped just past DxeLoadCore's end at 997.0.
    let dxe_main_start = find_ts(&events, "StartOVMFDxeMain");
    assert!(dxe_main_start > 997.0 && dxe_main_start < 997.001);

    // Driver dispatch lines produce no events.
    assert!(events.iter().all(|e| !e.name.as_str().contains("FvbDxe")));
}

#[test]
fn test_verify_phases_are_folded() {
    // Two overlapping verify phases: start at the earliest (997.2), with 0.2 + 0.2 = 0.4 s of
    // work even though only 0.3 s of wall time elapsed.
    let lines = parse_serial_log(SYNTHETIC_LOG);
    let (_, events) = boot_events(&lines, 1000.0).unwrap();
    let start = find_ts(&events, "StartOVMFVerify");
    let end = find_ts(&events, "EndOVMFVerify");
    assert!((start - 997.2).abs() < 1e-9);
    assert!((end - start - 0.4).abs() < 1e-9);
    assert!(events.iter().all(|e| !e.name.as_str().contains("SigVerify")));
}

#[test]
fn test_self_test_pass_is_discarded() {
    let log = "\
SecMain CSG-M4G1C G3N3S1S BEGIN (ticks): 1000000 Freq: 1000000
SecMain CSG-M4G1C G3N3S1S END (ticks): 1100000
SecMain CSG-M4G1C BEGIN (ticks): 2000000 Freq: 1000000
SecMain CSG-M4G1C END (ticks): 3000000
";
    let lines = parse_serial_log(log);
    let (_, events) = boot_events(&lines, 100.0).unwrap();
    // The decoy pair would put SecMain's start 1 s earlier; the real pair spans 99..100.
    assert_eq!(find_ts(&events, "StartOVMFSecMain"), 99.0);
    assert_eq!(find_ts(&events, "EndOVMFSecMain"), 100.0);
}

#[test]
fn test_missing_end_marker_is_structural() {
    let log = "\
SecMain CSG-M4G1C BEGIN (ticks): 1000000 Freq: 1000000
PeiCore CSG-M4G1C BEGIN (ticks): 1500000
SecMain CSG-M4G1C END (ticks): 2000000 Freq: 1000000
";
    let lines = parse_serial_log(log);
    let err = boot_events(&lines, 10.0).unwrap_err();
    assert!(err.to_string().contains("PeiCore"));
    assert!(!err.is_transient());
}

#[test]
fn test_frequency_mismatch_across_boots() {
    let log = "\
SecMain CSG-M4G1C BEGIN (ticks): 1000000 Freq: 1000000
SecMain CSG-M4G1C END (ticks): 2000000 Freq: 2000000
";
    let lines = parse_serial_log(log);
    assert!(matches!(
        boot_events(&lines, 10.0),
        Err(CollectError::FrequencyMismatch { .. })
    ));
}
