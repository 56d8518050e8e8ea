use std::{
    io::{self, IsTerminal},
    path::PathBuf,
};

use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};

use crate::db::Status;

/// Determine the default value for `no_interactive` based on interactivity of stdin and stderr.
fn determine_no_interactive() -> bool {
    !(io::stdin().is_terminal() && io::stderr().is_terminal())
}

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Source tree root.
    pub source: PathBuf,
    /// Destination root; defaults to the source (in-place mode).
    #[arg(long, value_name = "DIR")]
    pub dest: Option<PathBuf>,
    /// Catalog database file; defaults to `<dest>.db`.
    #[arg(long, value_name = "PATH")]
    pub db: Option<PathBuf>,
    /// Directory holding `converters.yml` and `application.yml`.
    #[arg(
        short = 'C',
        long,
        value_name = "DIR",
        env = "ARKIV_CONFIG_DIR",
        default_value = "config"
    )]
    pub config: PathBuf,
    /// Only records with this media type.
    #[arg(long, value_name = "MIME")]
    pub mime: Option<String>,
    /// Only records with this format registry identifier.
    #[arg(long, value_name = "PUID")]
    pub puid: Option<String>,
    /// Only records with this path extension.
    #[arg(long, value_name = "EXT")]
    pub ext: Option<String>,
    /// Only records with this status.
    #[arg(long, value_name = "STATUS")]
    pub status: Option<Status>,
    /// Include records already in a terminal status and purge their derived
    /// artifacts before re-running.
    #[arg(long)]
    pub reconvert: bool,
    /// Include only records in a failure status.
    #[arg(long, conflicts_with = "reconvert")]
    pub retry: bool,
    /// Identify files and update the catalog; skip conversion.
    #[arg(long)]
    pub identify_only: bool,
    /// Reconcile catalog and filesystem before converting.
    #[arg(long)]
    pub filecheck: bool,
    /// Rename source files to the canonical extension of their media type
    /// during identification.
    #[arg(long)]
    pub set_source_ext: bool,
    /// Retain every original in the destination regardless of recipe.
    #[arg(long)]
    pub keep_originals: bool,
    /// Stack the destination extension on top of the original extension.
    #[arg(long)]
    pub orig_ext: bool,
    /// Partition work per top-level subfolder.
    #[arg(long)]
    pub multi: bool,
    /// Print command, stdout and stderr when a conversion fails.
    #[arg(long)]
    pub debug: bool,
    /// Lower bound (inclusive) on record paths.
    #[arg(long, value_name = "PATH")]
    pub from_path: Option<String>,
    /// Upper bound (exclusive) on record paths.
    #[arg(long, value_name = "PATH")]
    pub to_path: Option<String>,
    /// Number of worker threads; defaults to the available parallelism.
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
    /// Do not require user action.
    ///
    /// This option is set automatically if the standard input is not a terminal.
    #[arg(short = 'I', long, default_value_t = determine_no_interactive())]
    pub no_interactive: bool,
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}
