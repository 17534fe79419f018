mod cli;
mod commands;
mod config;
mod git;
mod methods;
mod paths;
mod runner;
mod scheduler;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub jobs: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(if matches!(cli.command, Command::Run) {
            Some(env_logger::TimestampPrecision::Seconds)
        } else {
            None
        })
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        jobs: cli.jobs,
    };

    match cli.command {
        Command::Run => commands::run::run(&ctx),
        Command::Tick(args) => commands::tick::run(&ctx, args),
        Command::Status(args) => commands::status::run(&ctx, args),
        Command::Reset(args) => commands::reset::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "anchor", &mut io::stdout());
            Ok(())
        }
    }
}
