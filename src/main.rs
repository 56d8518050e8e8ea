mod app;
mod config;
mod db;
mod discover;
mod error;
mod filecheck;
mod identify;
mod logger;
mod output;
mod recipe;
mod runner;
mod scheduler;
mod term;
mod util;
mod worker;

use clap::Parser;

use app::Cli;
use logger::error;

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose.log_level_filter());

    if let Err(err) = app::run_cli(cli) {
        error!("{err:#}");
        std::process::exit(1);
    }
}
