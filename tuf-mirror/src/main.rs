/*!
`tuf-mirror` copies a TUF repository into OCI storage.

Currently implemented:
* mirroring top-level metadata, including the full root chain, as one OCI image
* mirroring top-level targets as one image per target file
* mirroring delegated targets as one image index per delegated role (`--full`)
* writing to a local OCI layout (`oci://<path>`) or pushing to a registry (`docker://<ref>`)

Configuration comes from:
* command-line parameters, to specify sources, destinations and the trust root
* Mirror.toml, for named trust roots, registry credentials and download tuning
*/

mod cmd;

use clap::Parser;
use simplelog::{CombinedLogger, Config as LogConfig, ConfigBuilder, LevelFilter, SimpleLogger};
use snafu::ResultExt;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use tokio::runtime::Runtime;

/// Crates whose INFO output drowns out the mirror's own progress lines.
const NOISY_CRATES: &[&str] = &["h2", "hyper", "oci_client", "reqwest", "rustls"];

fn run() -> Result<()> {
    // Parse and store the args passed to the program
    let args = Args::parse();

    // SimpleLogger will send errors to stderr and anything less to stdout.  HTTP crates are held
    // to WARN with a second logger so INFO stays readable.
    match args.log_level {
        LevelFilter::Info => {
            let mut quiet = ConfigBuilder::new();
            let mut noisy = ConfigBuilder::new();
            for name in NOISY_CRATES {
                quiet.add_filter_ignore_str(*name);
                noisy.add_filter_allow_str(*name);
            }
            CombinedLogger::init(vec![
                SimpleLogger::new(LevelFilter::Info, quiet.build()),
                SimpleLogger::new(LevelFilter::Warn, noisy.build()),
            ])
            .context(error::LoggerSnafu)?;
        }
        _ => {
            SimpleLogger::init(args.log_level, LogConfig::default()).context(error::LoggerSnafu)?
        }
    }

    let rt = Runtime::new().context(error::RuntimeSnafu)?;
    match args.subcommand {
        SubCommands::Metadata(ref metadata_args) => rt.block_on(async {
            cmd::metadata::run(&args, metadata_args)
                .await
                .context(error::MetadataSnafu)
        }),
        SubCommands::Targets(ref targets_args) => rt.block_on(async {
            cmd::targets::run(&args, targets_args)
                .await
                .context(error::TargetsSnafu)
        }),
        SubCommands::All(ref all_args) => rt.block_on(async {
            cmd::all::run(&args, all_args)
                .await
                .context(error::AllSnafu)
        }),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

/// Mirrors TUF metadata and targets to OCI layouts and registries
#[derive(Debug, Parser)]
pub struct Args {
    #[arg(global = true, long, default_value = "INFO")]
    /// How much detail to log; from least to most: ERROR, WARN, INFO, DEBUG, TRACE
    log_level: LevelFilter,

    #[arg(global = true, long)]
    /// Path to Mirror.toml; defaults to ./Mirror.toml when present
    config_path: Option<PathBuf>,

    #[arg(global = true, short = 't', long)]
    /// Working directory for TUF metadata and downloads; defaults to ~/.docker/tuf
    tuf_path: Option<PathBuf>,

    #[arg(global = true, short = 'r', long, default_value = tuf_mirror_config::DEFAULT_ROOT_NAME)]
    /// Trust root defined under [roots.<name>] in Mirror.toml; none are built in, so without a
    /// config file use --root-role-path
    tuf_root: String,

    #[arg(global = true, long)]
    /// Trust root file to start from; overrides --tuf-root
    root_role_path: Option<PathBuf>,

    #[arg(global = true, short = 'f', long)]
    /// Also mirror targets of delegated roles
    full: bool,

    #[arg(global = true, long)]
    /// Cancel the run after this many seconds
    timeout_secs: Option<u64>,

    #[arg(global = true, long)]
    /// How many targets to download at once; defaults to the CPU count, at most 16
    max_concurrent_downloads: Option<NonZeroUsize>,

    #[command(subcommand)]
    subcommand: SubCommands,
}

#[derive(Debug, Parser)]
enum SubCommands {
    Metadata(cmd::metadata::MetadataArgs),
    Targets(cmd::targets::TargetsArgs),
    All(cmd::all::AllArgs),
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("Failed to mirror metadata and targets: {}", source))]
        All { source: crate::cmd::all::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Failed to mirror metadata: {}", source))]
        Metadata { source: crate::cmd::metadata::Error },

        #[snafu(display("Failed to create async runtime: {}", source))]
        Runtime { source: std::io::Error },

        #[snafu(display("Failed to mirror targets: {}", source))]
        Targets { source: crate::cmd::targets::Error },
    }
}
type Result<T> = std::result::Result<T, error::Error>;
