// pint/src/cli/install.rs

use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use pint_common::model::options::BuildOptions;
use pint_core::{InstallOptions, Installer, InterruptState};
use tracing::{debug, instrument};

use crate::cli::header;

#[derive(Debug, Args)]
pub struct InstallArgs {
    #[arg(required = true)]
    names: Vec<String>,

    #[arg(long, help = "Pour a bottle even if options were given")]
    force_bottle: bool,
    #[arg(
        long,
        help = "Force building the formula from source, even if a bottle is available"
    )]
    build_from_source: bool,
    #[arg(long, help = "Also install test dependencies of the named formulae")]
    include_test: bool,
    #[arg(long, help = "Keep the scratch build directory")]
    keep_tmp: bool,
    #[arg(long, help = "Build interactively instead of pouring")]
    interactive: bool,
    #[arg(long = "with", value_name = "OPT", num_args = 1.., help = "Enable optional dependencies or features")]
    with: Vec<String>,
    #[arg(long = "without", value_name = "OPT", num_args = 1.., help = "Disable recommended dependencies or features")]
    without: Vec<String>,
    #[arg(long = "ignore-dependencies", help = "Do not install any dependencies")]
    ignore_deps: bool,
    #[arg(long, help = "Install again even if the same version is already present")]
    reinstall: bool,
    #[arg(long, help = "Install even if conflicting formulae are linked")]
    force: bool,
}

impl InstallArgs {
    fn build_options(&self) -> BuildOptions {
        let with = self.with.iter().map(|o| prefixed("with-", o));
        let without = self.without.iter().map(|o| prefixed("without-", o));
        with.chain(without).collect()
    }

    fn install_options(&self, verbose: bool) -> InstallOptions {
        InstallOptions {
            force_bottle: self.force_bottle,
            build_from_source: self.build_from_source,
            include_test: self.include_test,
            keep_tmp: self.keep_tmp,
            interactive: self.interactive,
            ignore_deps: self.ignore_deps,
            reinstall: self.reinstall,
            force: self.force,
            verbose,
            options: self.build_options(),
            ..InstallOptions::on_request()
        }
    }

    #[instrument(skip(self, config, interrupt), fields(targets = ?self.names))]
    pub async fn run(&self, config: &Config, interrupt: Arc<InterruptState>, verbose: bool) -> Result<()> {
        let config = config.clone();
        let names = self.names.clone();
        let options = self.install_options(verbose);

        let summary = tokio::task::spawn_blocking(move || -> Result<Summary> {
            let installer = Installer::new(config).with_interrupt(interrupt);
            let mut run = installer.run();
            let mut installed = Vec::new();
            for name in &names {
                header(&format!("Installing {name}"));
                let outcome = run.install(name, options.clone())?;
                if outcome.joined {
                    debug!("{} was already handled earlier in this run", name);
                    continue;
                }
                installed.push(format!("{} {}", outcome.formula, outcome.version));
            }
            Ok(Summary {
                installed,
                warnings: run.warnings().to_vec(),
                caveats: run.caveats().to_vec(),
            })
        })
        .await
        .map_err(|e| PintError::Generic(format!("install task failed: {e}")))??;

        summary.print();
        Ok(())
    }
}

fn prefixed(prefix: &str, option: &str) -> String {
    if option.starts_with(prefix) {
        option.to_string()
    } else {
        format!("{prefix}{option}")
    }
}

struct Summary {
    installed: Vec<String>,
    warnings: Vec<String>,
    caveats: Vec<(String, String)>,
}

impl Summary {
    fn print(&self) {
        if !self.warnings.is_empty() {
            header("Warnings");
            for warning in &self.warnings {
                println!("{} {}", "Warning:".yellow(), warning);
            }
        }
        for (formula, caveat) in &self.caveats {
            header(&format!("Caveats for {formula}"));
            println!("{}", caveat.trim_end());
        }
        if !self.installed.is_empty() {
            header("Summary");
            for line in &self.installed {
                println!("{} {}", "✔".green(), line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{CliArgs, Command};

    fn parse(args: &[&str]) -> InstallArgs {
        match CliArgs::parse_from(args).command {
            Command::Install(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn with_and_without_become_option_names() {
        let args = parse(&["pint", "install", "curl", "--with", "ssl", "with-http2", "--without", "docs"]);
        let options = args.build_options();
        assert_eq!(
            options.iter().collect::<Vec<_>>(),
            vec!["with-http2", "with-ssl", "without-docs"]
        );
    }

    #[test]
    fn command_line_requests_are_on_request() {
        let args = parse(&["pint", "install", "curl", "--build-from-source", "--ignore-dependencies"]);
        let options = args.install_options(false);
        assert!(options.installed_on_request);
        assert!(!options.installed_as_dependency);
        assert!(options.build_from_source);
        assert!(options.ignore_deps);
    }
}
