mod cli;

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::Local;

use crate::{
    config::{self, AppConfig},
    db::{Catalog, Filter},
    discover, filecheck,
    identify::Identifier,
    logger::{debug, info},
    output::owriteln,
    recipe::Registry,
    scheduler,
    term::Confirm,
    util,
    worker::RunContext,
};

pub use self::cli::Cli;

/// Run the CLI.
pub fn run_cli(cli: Cli) -> Result<()> {
    info!(
        "Arkiv version: {} (SQLite version: {})",
        env!("CARGO_PKG_VERSION"),
        rusqlite::version()
    );

    let source_dir = cli.source.clone();
    if !source_dir.is_dir() {
        bail!("Source directory '{}' does not exist", source_dir.display());
    }
    let dest_dir = cli.dest.clone().unwrap_or_else(|| source_dir.clone());
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("Failed to create '{}'", dest_dir.display()))?;
    let db_path = cli.db.clone().unwrap_or_else(|| default_db_path(&dest_dir));

    let app_config = AppConfig::load(&cli.config)?;
    let registry = config::load_registry(&cli.config)?;

    let temp_dir = env::temp_dir().join("convert");
    util::delete_file_or_dir(&temp_dir)
        .with_context(|| format!("Failed to wipe scratch at '{}'", temp_dir.display()))?;

    let mut catalog = Catalog::open(&db_path)?;
    if catalog.is_empty()? {
        let count = discover::discover(&mut catalog, &source_dir, &dest_dir)?;
        info!("Discovered {count} files under '{}'", source_dir.display());
    }

    if cli.filecheck && !filecheck::run(&mut catalog, &source_dir, cli.no_interactive)? {
        owriteln!("Aborted.")?;
        return Ok(());
    }

    let run_start = Local::now();
    let filter = Filter {
        mime: cli.mime.clone(),
        puid: cli.puid.clone(),
        ext: cli.ext.clone().map(|ext| {
            if ext.starts_with('.') {
                ext
            } else {
                format!(".{ext}")
            }
        }),
        status: cli.status,
        retry: cli.retry,
        pending_only: !(cli.reconvert || cli.retry || cli.status.is_some()),
        from_path: cli.from_path.clone(),
        to_path: cli.to_path.clone(),
        before: Some(run_start),
        ..Filter::default()
    };

    let count = catalog.count(&filter)?;
    if count == 0 {
        owriteln!("No files to convert.")?;
        return Ok(());
    }
    // the scheduler's writer task opens its own connection
    drop(catalog);

    if !cli.no_interactive {
        let verb = if cli.identify_only {
            "Identify"
        } else {
            "Convert"
        };
        if !Confirm::new(format!("{verb} {count} files?"), true).confirm()? {
            owriteln!("Aborted.")?;
            return Ok(());
        }
    }

    if !cli.identify_only {
        ensure_office_server(&app_config, &registry)?;
    }
    demote_priority();

    let ctx = RunContext {
        source_dir,
        dest_dir,
        temp_dir,
        config_dir: cli.config.clone(),
        registry,
        identifier: Identifier::new(app_config.use_siegfried),
        default_timeout: app_config.timeout,
        orig_ext: cli.orig_ext,
        set_source_ext: cli.set_source_ext,
        identify_only: cli.identify_only,
        keep_originals: cli.keep_originals || app_config.keep_original_files,
        debug: cli.debug,
    };
    let jobs = cli.jobs.unwrap_or_else(num_cpus::get).max(1);
    let purge = cli.reconvert || cli.retry;

    let summary = scheduler::run(&ctx, &db_path, &filter, jobs, purge, cli.multi)?;

    if cli.identify_only {
        owriteln!("Identified {} files.", summary.finished)?;
    } else if summary.failed > 0 {
        owriteln!(
            "Not all files were converted ({} failed). See '{}' for details.",
            summary.failed,
            db_path.display()
        )?;
    } else if summary.finished > 0 {
        owriteln!("All files converted successfully.")?;
    } else {
        owriteln!("All files converted previously.")?;
    }
    Ok(())
}

fn default_db_path(dest_dir: &Path) -> PathBuf {
    let dest = dest_dir.to_string_lossy();
    PathBuf::from(format!("{}.db", dest.trim_end_matches('/')))
}

/// Converters are heavy; keep the whole process tree out of the way of
/// interactive work on the host.
#[cfg(unix)]
fn demote_priority() {
    unsafe {
        libc::nice(19);
    }
}

#[cfg(not(unix))]
fn demote_priority() {}

/// Start the LibreOffice `unoserver` when any recipe needs `unoconvert`
/// and a managed interpreter is configured, then wait for the office
/// process to appear.
fn ensure_office_server(config: &AppConfig, registry: &Registry) -> Result<()> {
    if !registry.any_command_contains("unoconvert") {
        return Ok(());
    }
    let Some(python) = &config.soffice_python else {
        debug!("No soffice-python configured; assuming the office server is managed externally");
        return Ok(());
    };
    if office_server_running() {
        return Ok(());
    }

    info!("Starting office server ...");
    let mut cmd = Command::new(python);
    cmd.args(["-m", "unoserver.server"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // detach: the server outlives the run
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }
    cmd.spawn()
        .with_context(|| format!("Failed to start office server via '{}'", python.display()))?;

    for _ in 0..30 {
        thread::sleep(Duration::from_secs(1));
        if office_server_running() {
            return Ok(());
        }
    }
    bail!("Office server did not come up within 30s");
}

fn office_server_running() -> bool {
    ["soffice", "soffice.bin"].into_iter().any(|name| {
        Command::new("pgrep")
            .args(["-x", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    })
}
