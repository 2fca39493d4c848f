// pint/src/cli/fetch.rs

use std::sync::Arc;

use clap::Args;
use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use pint_core::{InstallOptions, Installer, InterruptState};
use tracing::instrument;

use crate::cli::header;

/// Materialize bottles and sources for formulae and everything they would install.
#[derive(Debug, Args)]
pub struct FetchArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, help = "Fetch source archives instead of bottles")]
    build_from_source: bool,
    #[arg(long, help = "Fetch bottles even if options were given")]
    force_bottle: bool,
    #[arg(long, help = "Include test dependencies")]
    include_test: bool,
}

impl FetchArgs {
    #[instrument(skip(self, config, interrupt), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config, interrupt: Arc<InterruptState>) -> Result<()> {
        let config = config.clone();
        let names = self.names.clone();
        let options = InstallOptions {
            build_from_source: self.build_from_source,
            force_bottle: self.force_bottle,
            include_test: self.include_test,
            ..InstallOptions::on_request()
        };

        tokio::task::spawn_blocking(move || -> Result<()> {
            let installer = Installer::new(config).with_interrupt(interrupt);
            for name in &names {
                header(&format!("Fetching {name}"));
                for (formula, path) in installer.fetch(name, &options)? {
                    println!("{}: {}", formula, path.display());
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| PintError::Generic(format!("fetch task failed: {e}")))?
    }
}
