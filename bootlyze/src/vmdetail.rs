/// The full cold-start breakdown of one confidential VM.
///
/// Event order follows the boot itself: containerd creates the pod sandbox, the VM runtime
/// prepares and launches the VM, pre-launch attestation injects the launch secrets, the firmware
/// boots (serial console), the guest kernel boots (forwarded console lines), and finally the
/// guest agent comes up.  Every timestamp after the sandbox start is lower-bounded by the phase
/// that must precede it, so a stale journal record cannot silently produce a plausible-looking
/// timeline.
use crate::config::RunConfig;
use crate::driver;

use anyhow::Result;
use bootlog::{
    boot_events, parse_serial_log, wait_for_pod_ready, Event, Timeline,
    GUEST_KERNEL_END_MARKER, GUEST_KERNEL_START_MARKER,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const CSV_HEADER: [&str; 3] = ["Run", "Event", "TimeStampSecs"];

/// Spans that must be properly ordered in the assembled timeline.  OVMF phase pairs are checked
/// at construction time by the firmware module, so only the cross-source pairs are listed.

const CONSTRAINTS: [(&str, &str); 6] = [
    ("StartRunPodSandbox", "EndRunPodSandbox"),
    ("StartVMStarted", "EndVMStarted"),
    ("StartPreAtt", "EndPreAtt"),
    ("StartOVMFBoot", "EndOVMFBoot"),
    ("StartGuestKernelBoot", "EndGuestKernelBoot"),
    ("EndOVMFBoot", "EndGuestKernelBoot"),
];

pub fn run(cfg: &RunConfig, serial_log: &Path) -> Result<()> {
    let pod_name = driver::wait_for_first_pod(cfg)?;
    info!(pod_name, "pod observed, waiting for readiness");
    wait_for_pod_ready(&cfg.namespace, &pod_name, Duration::from_secs(2), cfg.timeout)?;

    let mut events = vec![];

    // Sandbox creation brackets everything containerd does for this pod.
    let (start_ps, end_ps) = driver::event_span(cfg, "RunPodSandbox", &pod_name, None)?;
    events.push(Event::new("StartRunPodSandbox", start_ps));
    events.push(Event::new("EndRunPodSandbox", end_ps));

    // From here on the VM runtime logs against the sandbox id, not the pod name.
    let sandbox_id = driver::sandbox_id(cfg, &pod_name)?;
    info!(sandbox_id, "resolved sandbox id");

    // VM preparation starts with the first runtime log line for this sandbox.
    let start_vmp = driver::event_ts(
        cfg,
        "IOMMUPlatform is disabled by default.",
        &sandbox_id,
        Some(start_ps),
    )?;
    events.push(Event::new("StartVMPreparation", start_vmp));

    let start_vms = driver::event_ts(cfg, "Starting VM", &sandbox_id, Some(start_vmp))?;
    events.push(Event::new("StartVMStarted", start_vms));

    let start_preatt = driver::event_ts(
        cfg,
        "Processing prelaunch attestation",
        &sandbox_id,
        Some(start_vms),
    )?;
    let end_preatt = driver::event_ts(
        cfg,
        "Launch secrets injected",
        &sandbox_id,
        Some(start_preatt),
    )?;
    events.push(Event::new("StartPreAtt", start_preatt));
    events.push(Event::new("EndPreAtt", end_preatt));

    let end_vms = driver::event_ts(cfg, "VM started", &sandbox_id, Some(end_preatt))?;
    events.push(Event::new("EndVMStarted", end_vms));

    // Guest kernel boundaries, both recovered from forwarded console lines.
    let start_gk = {
        let records = driver::matching_records(
            &cfg.journal,
            cfg.budget,
            GUEST_KERNEL_START_MARKER,
            GUEST_KERNEL_START_MARKER,
            1,
            None,
        )?;
        bootlog::guest_kernel_start_secs(
            records.last().ok_or_else(|| anyhow::anyhow!("no records after retry"))?,
            Some(start_vms),
        )?
    };
    let end_gk = driver::event_ts(
        cfg,
        GUEST_KERNEL_END_MARKER,
        GUEST_KERNEL_END_MARKER,
        Some(start_gk),
    )?;
    events.push(Event::new("StartGuestKernelBoot", start_gk));
    events.push(Event::new("EndGuestKernelBoot", end_gk));

    // Firmware phases from the serial console, anchored to the guest kernel start.
    let lines = parse_serial_log(&std::fs::read_to_string(serial_log)?);
    let (anchor, fw_events) = boot_events(&lines, start_gk)?;
    info!(
        tick_frequency_hz = anchor.tick_frequency_hz,
        events = fw_events.len(),
        "firmware timeline anchored"
    );
    events.extend(fw_events);

    let ts_agent = driver::event_ts(cfg, "Agent started", &sandbox_id, Some(end_vms))?;
    events.push(Event::new("AgentStarted", ts_agent));

    let timeline = Timeline::assemble(events, &CONSTRAINTS)?;
    driver::export_timeline(cfg, &CSV_HEADER, &timeline)
}
