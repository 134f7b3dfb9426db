mod backend;
mod cli;
mod commands;
mod config;
mod paths;
mod runner;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::Manifest;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
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
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Provision(args) => {
            let manifest = Manifest::load(&cli.manifest)?;
            commands::provision::run(&ctx, &manifest, &args)
        }
        Command::Describe => {
            let manifest = Manifest::load(&cli.manifest)?;
            commands::describe::run(&ctx, &manifest)
        }
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "stackup", &mut io::stdout());
            Ok(())
        }
    }
}
