//! # Terminal logger
//! A small [`log`] backend which writes styled level headers to stderr when
//! stderr is a terminal, and plain headers otherwise.
use std::io::{self, IsTerminal};

use crossterm::style::{StyledContent, Stylize};
#[allow(unused_imports)]
pub use log::{debug, error, info, trace, warn};
use log::{Level, LevelFilter, Log, Metadata, Record};

static LOGGER: Logger = Logger {};

/// Install the logger with the given maximum level.
pub fn init(filter: LevelFilter) {
    // set_logger only fails if a logger is already installed
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(filter);
}

fn log_with_style<Y: FnOnce(&'static str) -> StyledContent<&'static str>>(
    style: Y,
    header: &'static str,
    args: &std::fmt::Arguments,
) {
    if io::stderr().is_terminal() {
        eprintln!("{} {args}", style(header));
    } else {
        eprintln!("{header} {args}");
    }
}

pub struct Logger {}

#[inline]
fn level_as_str(level: Level) -> &'static str {
    match level {
        Level::Error => "error:",
        Level::Warn => "warning:",
        Level::Info => "info:",
        Level::Debug => "debug:",
        Level::Trace => "trace:",
    }
}

#[inline]
fn level_formatter(level: Level) -> fn(&'static str) -> StyledContent<&'static str> {
    match level {
        Level::Error => |s| s.stylize().red().bold(),
        Level::Warn => |s| s.stylize().yellow().bold(),
        Level::Info => |s| s.stylize().blue().bold(),
        Level::Debug => |s| s.stylize().magenta().bold(),
        Level::Trace => |s| s.stylize().green().bold(),
    }
}

impl Log for Logger {
    #[inline]
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    #[inline]
    fn log(&self, record: &Record) {
        let level = record.level();
        log_with_style(level_formatter(level), level_as_str(level), record.args());
    }

    #[inline]
    fn flush(&self) {}
}
