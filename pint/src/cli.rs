// pint/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand};
use pint_common::config::Config;
use pint_common::error::Result;
use pint_core::InterruptState;

pub mod deps;
pub mod fetch;
pub mod install;

use crate::cli::deps::Deps;
use crate::cli::fetch::FetchArgs;
use crate::cli::install::InstallArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "pint", bin_name = "pint")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Operate on another prefix instead of the configured one
    #[arg(long, value_name = "DIR", global = true)]
    pub prefix: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Install(InstallArgs),
    Fetch(FetchArgs),
    Deps(Deps),
}

impl Command {
    pub async fn run(&self, config: &Config, interrupt: Arc<InterruptState>, verbose: bool) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config, interrupt, verbose).await,
            Self::Fetch(command) => command.run(config, interrupt).await,
            Self::Deps(command) => command.run(config).await,
        }
    }
}

/// `==> ` header line, as every command prints them.
pub fn header(text: &str) {
    use colored::Colorize;
    println!("{}{}", "==> ".bold().blue(), text.bold());
}
