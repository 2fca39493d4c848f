// pint/src/main.rs
use std::fs;
use std::path::Path;
use std::process;

use clap::Parser;
use colored::Colorize;
use pint_common::config::Config;
use pint_common::error::{PintError, Result as pintResult};
use pint_core::InterruptState;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;
use cli::CliArgs;

fn init_logging(verbose: u8, log_dir: &Path) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("PINT_LOG")
        .from_env_lossy();

    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    if let Err(e) = fs::create_dir_all(log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Error:".red().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, "pint.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    Box::leak(Box::new(guard)); // Keep guard alive

    debug!(
        "Verbose logging enabled. Writing logs to: {}/pint.log",
        log_dir.display()
    );
}

fn load_config(prefix: Option<&Path>) -> pintResult<Config> {
    let mut config = Config::load()?;
    if let Some(prefix) = prefix {
        let rooted = Config::with_prefix(prefix);
        config.prefix = rooted.prefix;
        config.formula_dir = rooted.formula_dir;
        config.cache_dir = rooted.cache_dir;
    }
    Ok(config)
}

fn report(err: &PintError) {
    error!("Command failed: {:#}", err);
    eprintln!("{}: {:#}", "Error".red().bold(), err);
    if let Some(hint) = err.remediation() {
        for line in hint.lines() {
            eprintln!("  {} {}", "==>".yellow(), line);
        }
    }
}

#[tokio::main]
async fn main() -> pintResult<()> {
    let cli_args = CliArgs::parse();

    let config = match load_config(cli_args.prefix.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: Could not load config: {:#}", "Error".red().bold(), e);
            process::exit(1);
        }
    };
    init_logging(cli_args.verbose, &config.logs_dir());

    let interrupt = InterruptState::new();
    {
        let interrupt = interrupt.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping at the next safe point");
                interrupt.raise();
            }
        });
    }

    if let Err(e) = cli_args
        .command
        .run(&config, interrupt, cli_args.verbose > 0)
        .await
    {
        report(&e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
