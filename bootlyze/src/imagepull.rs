/// Guest-side image-pull breakdown, one timeline per image.
///
/// The guest components print delimiters around each pull phase:
///
///     CSG-M4GIC: B3G1N: <phase>
///     CSG-M4GIC: END: <phase>
///
/// for the phases `GC Image Pull`, `Pull Manifest`, `Signature Validation` and `Pull Layers`.
/// Inside `Pull Layers` each layer is pulled and then handled (decrypted and unpacked) with its
/// own digest-tagged BEGIN/END pairs; since layers may be processed concurrently, the per-layer
/// durations are work time, and the pull/handle boundary inside the parent span is reconstructed
/// from their work-time ratio.
use crate::config::RunConfig;
use crate::driver;

use anyhow::Result;
use bootlog::{
    aggregate_serial, apportion_by_ratio, digest_matched_pairs, wait_for_pod_ready, Event,
    Timeline,
};
use cvmutils::ResultFile;
use std::time::Duration;
use tracing::info;

const CSV_HEADER: [&str; 4] = ["Run", "Image", "Event", "TimeStampSecs"];

const PULL_PHASES: [&str; 4] = [
    "GC Image Pull",
    "Pull Manifest",
    "Signature Validation",
    "Pull Layers",
];

fn begin_marker(phase: &str) -> String {
    format!("CSG-M4GIC: B3G1N: {phase}")
}

fn end_marker(phase: &str) -> String {
    format!("CSG-M4GIC: END: {phase}")
}

/// The label written into the Image column: the final path segment of the image reference.

fn image_label(image: &str) -> String {
    image.rsplit('/').next().unwrap_or(image).to_string()
}

pub fn run(cfg: &RunConfig, images: &[String]) -> Result<()> {
    let pod_name = driver::wait_for_first_pod(cfg)?;
    wait_for_pod_ready(&cfg.namespace, &pod_name, Duration::from_secs(2), cfg.timeout)?;

    let mut out = ResultFile::create(&cfg.output, &CSV_HEADER)?;
    for image in images {
        let timeline = collect_image(cfg, image)?;
        let label = image_label(image);
        info!(image = %label, events = timeline.events().len(), "image timeline assembled");
        for ev in timeline.events() {
            out.append(&[
                cfg.run.to_string(),
                label.clone(),
                ev.name.to_string(),
                format!("{:.6}", ev.timestamp_secs),
            ])?;
        }
    }
    Ok(())
}

fn collect_image(cfg: &RunConfig, image: &str) -> Result<Timeline> {
    let mut events = vec![];
    let mut layers_span = (0.0, 0.0);
    for phase in PULL_PHASES {
        let start = driver::event_ts(cfg, &begin_marker(phase), image, None)?;
        let end = driver::event_ts(cfg, &end_marker(phase), image, Some(start))?;
        if phase == "Pull Layers" {
            layers_span = (start, end);
        }
        let compact = phase.replace(' ', "");
        events.push(Event::new(&format!("Start{compact}"), start));
        events.push(Event::new(&format!("End{compact}"), end));
    }
    let mut constraints = vec![];
    for pair in events.chunks(2) {
        constraints.push((pair[0].name.as_str(), pair[1].name.as_str()));
    }

    // Apportion the Pull Layers parent span between pulling and handling.  Nydus-style images
    // stream their layers and emit no per-layer markers; for those the parent span stands alone.
    let pull_pairs = layer_pairs(cfg, image, "Pull Single Layer")?;
    let handle_pairs = layer_pairs(cfg, image, "Handle Single Layer")?;
    if !pull_pairs.is_empty() || !handle_pairs.is_empty() {
        let (start, end) = layers_span;
        let (pull_share, _) = apportion_by_ratio(
            end - start,
            aggregate_serial(&pull_pairs),
            aggregate_serial(&handle_pairs),
        );
        events.push(Event::new("StartPullSingleLayer", start));
        events.push(Event::new("EndPullSingleLayer", start + pull_share));
        events.push(Event::new("StartHandleSingleLayer", start + pull_share));
        events.push(Event::new("EndHandleSingleLayer", end));
    }

    Ok(Timeline::assemble(events, &constraints)?)
}

/// The digest-matched BEGIN/END pairs of one per-layer event kind.  Absence of any matching
/// records is not an error here: whether layers are marked depends on the image format.

fn layer_pairs(
    cfg: &RunConfig,
    image: &str,
    event: &str,
) -> Result<Vec<bootlog::EventPair>> {
    let records =
        driver::matching_records(&cfg.journal, cfg.budget, &begin_marker(event), image, 0, None)?;
    let ends =
        driver::matching_records(&cfg.journal, cfg.budget, &end_marker(event), image, 0, None)?;
    let all = records.into_iter().chain(ends).collect::<Vec<bootlog::RawRecord>>();
    Ok(digest_matched_pairs(
        &all,
        &begin_marker(event),
        &end_marker(event),
    )?)
}
