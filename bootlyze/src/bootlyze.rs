/// `bootlyze` -- collect cold-start timelines of confidential VMs
///
/// Run with --help for brief help.
///
/// The tool attaches to a workload someone else deploys: point it at the namespace before (or
/// just after) applying the service, and it waits for the pod, waits for readiness, reconstructs
/// the boot timeline from the host journal, the cluster API and (for vm-detail) the firmware
/// serial file, and appends CSV rows.  It never deploys, deletes or mutates anything in the
/// cluster.
///
/// Quirks
///
/// Timestamps recovered from pod conditions have one-second resolution, so in the startup
/// timeline they can tie with, or sit a fraction of a second away from, the journal-derived
/// events around them.  That is a property of the cluster API, not a collection bug.
///
/// The journal query window (--since) is deliberately generous and matching takes the last
/// occurrence, so re-running against a journal that holds several old runs is safe; running two
/// collections against the same namespace at the same time is not.
mod config;
mod driver;
mod fwparse;
mod imagepull;
mod startup;
mod vmdetail;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::RunConfig;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print information about the program
    Version,

    /// Full boot breakdown of one cVM: sandbox, VM launch, attestation, firmware, guest kernel
    VmDetail(VmDetailCmdArgs),

    /// Guest-side image-pull phase breakdown per image
    ImagePull(ImagePullCmdArgs),

    /// Coarse startup events: pod conditions plus containerd spans
    Startup(StartupCmdArgs),

    /// Parse a firmware serial log offline and print the recovered events
    ParseFirmware(ParseFirmwareCmdArgs),
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Run index recorded in the CSV rows
    #[arg(long, default_value_t = 0)]
    run: i64,

    /// CSV output file (truncated at the start of the run)
    #[arg(long, short)]
    output: String,

    /// Namespace the workload pod runs in
    #[arg(long, default_value = "default")]
    namespace: String,

    /// Journal query window, as understood by journalctl --since
    #[arg(long, default_value = bootlog::DEFAULT_SINCE)]
    since: String,

    /// Read journal records from a captured `journalctl -o json` dump instead of the live journal
    #[arg(long)]
    journal_dump: Option<String>,

    /// Attempts per journal query before giving up on a missing event
    #[arg(long, default_value_t = 3)]
    attempts: u32,

    /// Deadline in minutes for the pod to appear and become ready [default: none]
    #[arg(long)]
    timeout_mins: Option<u64>,
}

impl CollectArgs {
    fn to_config(&self) -> RunConfig {
        RunConfig::new(
            self.run,
            &self.output,
            &self.namespace,
            &self.since,
            self.journal_dump.as_deref(),
            self.attempts,
            self.timeout_mins,
        )
    }
}

#[derive(Args, Debug)]
pub struct VmDetailCmdArgs {
    #[command(flatten)]
    collect_args: CollectArgs,

    /// File the VM launcher redirects the firmware serial console to
    #[arg(long)]
    serial_log: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImagePullCmdArgs {
    #[command(flatten)]
    collect_args: CollectArgs,

    /// Image reference to break down (repeatable)
    #[arg(long, required = true)]
    image: Vec<String>,
}

#[derive(Args, Debug)]
pub struct StartupCmdArgs {
    #[command(flatten)]
    collect_args: CollectArgs,

    /// Image reference whose PullImage span to record (repeatable)
    #[arg(long)]
    image: Vec<String>,

    /// Container name whose CreateContainer span to record (repeatable)
    #[arg(long)]
    container: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ParseFirmwareCmdArgs {
    /// The captured serial console file
    #[arg(long)]
    serial_log: PathBuf,

    /// Wall-clock timestamp (epoch seconds) to anchor the end of firmware execution to
    #[arg(long, default_value_t = 0.0)]
    anchor: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match bootlyze() {
        Ok(()) => {}
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            process::exit(1);
        }
    }
}

fn bootlyze() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("bootlyze version(0.1.0)");
            Ok(())
        }
        Commands::VmDetail(ref args) => {
            vmdetail::run(&args.collect_args.to_config(), &args.serial_log)
        }
        Commands::ImagePull(ref args) => {
            imagepull::run(&args.collect_args.to_config(), &args.image)
        }
        Commands::Startup(ref args) => {
            startup::run(&args.collect_args.to_config(), &args.image, &args.container)
        }
        Commands::ParseFirmware(ref args) => fwparse::run(&args.serial_log, args.anchor),
    }
}
