/// Offline firmware-log parsing, for debugging instrumented firmware builds without a cluster.
/// The anchor timestamp stands in for the guest kernel start; with the default of 0 the printed
/// timestamps are negative offsets from the end of firmware execution.
use anyhow::Result;
use bootlog::{boot_events, parse_serial_log, Timeline};
use std::path::Path;

pub fn run(serial_log: &Path, anchor_secs: f64) -> Result<()> {
    let text = std::fs::read_to_string(serial_log)?;
    let lines = parse_serial_log(&text);
    let (anchor, events) = boot_events(&lines, anchor_secs)?;

    println!(
        "# {} marker lines, tick frequency {} Hz, anchored at {:.6}",
        lines.len(),
        anchor.tick_frequency_hz,
        anchor.anchor_wallclock_secs
    );
    let timeline = Timeline::assemble(events, &[("StartOVMFBoot", "EndOVMFBoot")])?;
    for ev in timeline.events() {
        println!("{:.6} {}", ev.timestamp_secs, ev.name);
    }
    Ok(())
}
