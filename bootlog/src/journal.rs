/// The host journal source.
///
/// The container runtime and the VM runtime both log through the host's structured journal, and
/// the journal is the only source that sees the host side of the whole boot: sandbox creation,
/// VM launch, attestation, image pulls, and the guest console forwarded over `vmconsole=`
/// messages.  A query is "time window + text filter": we pull the unit's recent records as JSON
/// (one object per line) and filter by substring downstream.
///
/// Records that cannot be decoded, or that lack the message or the real-time timestamp field,
/// are skipped, never fatal: the journal may hold binary blobs and partially-flushed entries and
/// none of them can be ours.
use crate::{CollectError, RawRecord};

use anyhow::Result;
use cvmutils::run_with_timeout;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use ustr::Ustr;

/// The journald unit the container runtime logs under.

pub const CONTAINERD_UNIT: &str = "containerd";

/// Default query window.  Generous on purpose: matching takes the *last* occurrence, so stale
/// records from earlier runs are harmless, while a window that is too narrow loses the run.

pub const DEFAULT_SINCE: &str = "10 min ago";

/// First log line of the guest kernel that is both early and unambiguous.

pub const GUEST_KERNEL_START_MARKER: &str = "random: crng init done";

/// The guest kernel's hand-off to userspace, marking the end of kernel boot.

pub const GUEST_KERNEL_END_MARKER: &str = "Run /init as init process";

/// A journal query target: either the live journal of a unit, or a captured `-o json` dump for
/// offline reconstruction.

#[derive(Debug, Clone)]
pub enum JournalSource {
    Live { unit: String, since: String },
    Dump { path: PathBuf },
}

impl JournalSource {
    pub fn source_id(&self) -> Ustr {
        match self {
            JournalSource::Live { unit, .. } => Ustr::from(&format!("journal:{unit}")),
            JournalSource::Dump { path } => Ustr::from(&format!("dump:{}", path.display())),
        }
    }

    /// Fetch the current record set.  Eventual consistency means a successful fetch may still be
    /// missing the records the caller wants; that is the retry loop's problem, not ours.

    pub fn fetch(&self) -> Result<Vec<RawRecord>> {
        let text = match self {
            JournalSource::Live { unit, since } => run_with_timeout(
                &format!("sudo journalctl -xeu {unit} --since \"{since}\" -o json"),
                Duration::from_secs(30),
            )?,
            JournalSource::Dump { path } => std::fs::read_to_string(path)?,
        };
        Ok(parse_json_lines(&text, self.source_id()))
    }
}

/// Parse journalctl `-o json` output: one JSON object per line, `MESSAGE` as text and
/// `__REALTIME_TIMESTAMP` as a decimal string of epoch microseconds.

pub fn parse_json_lines(text: &str, source: Ustr) -> Vec<RawRecord> {
    let mut records = vec![];
    for line in text.lines() {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(message) = value["MESSAGE"].as_str() else {
            continue; // binary payloads come through as arrays
        };
        let Some(timestamp_us) = value["__REALTIME_TIMESTAMP"]
            .as_str()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        records.push(RawRecord::new(message, timestamp_us, source));
    }
    records
}

fn vmconsole_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"vmconsole="\[ *([0-9.]+)\]"#).unwrap())
}

/// Work out the wall-clock time at which the guest kernel started booting.
///
/// The guest has its own clock domain: its dmesg timestamps count from kernel start.  But the
/// host forwards guest console lines into its own journal, so a console line observed at host
/// time T with guest offset G pins kernel start to T - G.  The `crng init done` line is used
/// because it is early, present on every boot, and unmistakable.

pub fn guest_kernel_start_secs(
    record: &RawRecord,
    lower_bound: Option<f64>,
) -> Result<f64, CollectError> {
    let missing = || CollectError::InsufficientEvents {
        event: "vmconsole guest timestamp".to_string(),
        entity: GUEST_KERNEL_START_MARKER.to_string(),
        extra: String::new(),
        needed: 1,
        found: 0,
    };
    let caps = vmconsole_regex().captures(&record.message).ok_or_else(missing)?;
    let guest_offset: f64 = caps[1].parse().map_err(|_| missing())?;
    let ts = record.timestamp_secs() - guest_offset;
    crate::extract::check_lower_bound("StartGuestKernelBoot", ts, lower_bound)?;
    Ok(ts)
}

#[cfg(test)]
fn src() -> Ustr {
    Ustr::from("test")
}

#[test]
fn test_parse_json_lines_skips_garbage() {
    let text = concat!(
        "{\"MESSAGE\":\"PullImage begins\",\"__REALTIME_TIMESTAMP\":\"100000000\"}\n",
        "not json at all\n",
        "{\"MESSAGE\":[1,2,3],\"__REALTIME_TIMESTAMP\":\"100000001\"}\n",
        "{\"MESSAGE\":\"no timestamp\"}\n",
        "{\"MESSAGE\":\"PullImage returns\",\"__REALTIME_TIMESTAMP\":\"103200000\"}\n",
    );
    let records = parse_json_lines(text, src());
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].timestamp_secs(), 100.0);
    assert_eq!(records[1].message, "PullImage returns");
}

#[test]
fn test_guest_kernel_start() {
    // Host sees the console line at t=1000 s; the guest was 3.25 s into its boot.
    let r = RawRecord::new(
        "vmconsole=\"[    3.250000] random: crng init done\"",
        1_000_000_000,
        src(),
    );
    assert_eq!(guest_kernel_start_secs(&r, None).unwrap(), 996.75);
    assert_eq!(guest_kernel_start_secs(&r, Some(990.0)).unwrap(), 996.75);

    // A start before the lower bound means we matched a stale record.
    assert!(guest_kernel_start_secs(&r, Some(997.0)).is_err());

    // Leading-space dmesg padding is accepted.
    let r = RawRecord::new("vmconsole=\"[   12.5] ...\"", 1_000_000_000, src());
    assert_eq!(guest_kernel_start_secs(&r, None).unwrap(), 987.5);

    let r = RawRecord::new("no marker here", 1_000_000_000, src());
    assert!(guest_kernel_start_secs(&r, None).is_err());
}
