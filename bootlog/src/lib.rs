/// A confidential VM's cold start leaves traces in three places, and no single one of them tells
/// the whole story.  The host journal holds the container runtime's and the VM runtime's records:
/// sandbox creation, VM launch, attestation, image pulls, and guest console lines forwarded as
/// `vmconsole=` messages.  The cluster API holds the pod's status conditions, at one-second
/// resolution.  The firmware can only write to the serial console, and it has no wall clock at
/// all, only a tick counter.
///
/// This library reconstructs a single wall-clock timeline of named boot events from those three
/// sources.  That task breaks down into a number of subtasks:
///
/// - Query each source, retrying bounded-ly while the eventually-consistent sources catch up
///   (journal records can land seconds after the fact).
///
/// - Extract the records that belong to this run: substring matching, taking the *last*
///   occurrence so that stale records from earlier runs within the query window are ignored,
///   with explicit per-event policies where duplication is inherent.
///
/// - Anchor the firmware's tick-counter timestamps to the wall clock, using the fact that the
///   firmware ends exactly when the guest kernel starts and the guest kernel's start is
///   observable from the host.
///
/// - Aggregate per-layer BEGIN/END sub-events into work-time sums and apportion opaque parent
///   phases by measured ratio.
///
/// - Assemble, order-check and export the final timeline.
///
/// Failures are classified throughout: transient ones (records not visible yet) are retried,
/// structural ones (markers missing, clocks inconsistent, ordering broken) abort the run, and
/// deadline expiries are reported with the last observed state.  The classification is in the
/// error type itself, never in the call site.
mod aggregate;
mod clock;
mod cluster;
mod dedup;
mod error;
mod extract;
mod firmware;
mod journal;
mod record;
mod retry;
mod timeline;

// The error taxonomy: transient vs structural vs timeout.

pub use error::CollectError;

// Raw log records and the events and pairs recovered from them.

pub use record::Event;
pub use record::EventPair;
pub use record::RawRecord;

// Bounded retry for eventually-consistent sources.

pub use retry::query_with_retry;
pub use retry::RetryBudget;

// Substring matching and count-checked extraction over record sets.

pub use extract::check_lower_bound;
pub use extract::extract;
pub use extract::last_timestamp;
pub use extract::matching;
pub use extract::span_timestamps;

// Occurrence selection when an event legitimately repeats.

pub use dedup::first_occurrence;
pub use dedup::last_occurrence;
pub use dedup::pair_policy;
pub use dedup::select_occurrence;
pub use dedup::OccurrencePolicy;
pub use dedup::PairPolicy;

// Tick-counter to wall-clock translation.

pub use clock::ClockAnchor;

// The host journal source: live journalctl queries or captured dumps.

pub use journal::guest_kernel_start_secs;
pub use journal::parse_json_lines;
pub use journal::JournalSource;
pub use journal::CONTAINERD_UNIT;
pub use journal::DEFAULT_SINCE;
pub use journal::GUEST_KERNEL_END_MARKER;
pub use journal::GUEST_KERNEL_START_MARKER;

// The cluster API source: pod conditions, readiness polling, sandbox ids.

pub use cluster::condition_events;
pub use cluster::container_id_from_pod;
pub use cluster::get_pod_conditions;
pub use cluster::is_ready;
pub use cluster::is_terminating;
pub use cluster::observation_start_event;
pub use cluster::pod_names_in_namespace;
pub use cluster::ready_timestamp_secs;
pub use cluster::sandbox_id_from_record;
pub use cluster::wait_for_pod_ready;
pub use cluster::PodCondition;
pub use cluster::TERMINATING_REASON;

// The firmware serial console source.

pub use firmware::boot_events;
pub use firmware::parse_serial_log;
pub use firmware::FirmwareLine;
pub use firmware::BOOT_MAGIC;
pub use firmware::SELF_TEST_MAGIC;

// Work-time aggregation and ratio apportioning of sub-event pairs.

pub use aggregate::aggregate_serial;
pub use aggregate::apportion_by_ratio;
pub use aggregate::digest_matched_pairs;

// The assembled, validated timeline of one run.

pub use timeline::OrderingConstraint;
pub use timeline::Timeline;
