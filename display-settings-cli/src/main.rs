//! Thin CLI host exercising the settings-transaction engine. CLI/process
//! lifecycle are explicitly out of scope for the core (spec.md §1); this
//! binary exists only because every teacher workspace carries one.

use anyhow::{Context as _, Result};
use clap::Parser;
use tracing::{debug, error, info};

pub mod cli;
pub mod config;
pub mod logging;

#[derive(Debug, Clone, clap::Parser)]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    command: cli::Command,
}

fn main() -> Result<()> {
    let _logging_guard = logging::setup();
    std::process::exit(run()?)
}

fn run() -> Result<i32> {
    debug!("parsing args: {:?}", std::env::args_os().collect::<Vec<_>>());
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let styled_string = e.render();
            for line in styled_string.ansi().to_string().lines() {
                if e.exit_code() == 0 {
                    info!("{}", line);
                } else {
                    error!("{}", line);
                }
            }
            return Ok(e.exit_code());
        }
    };
    debug!("running: {:?}", args);

    let config = config::get().context("failed to load host config")?;
    cli::run(args.command, &config)
}
