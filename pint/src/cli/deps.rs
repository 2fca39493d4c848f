// pint/src/cli/deps.rs

use clap::Args;
use colored::Colorize;
use pint_common::config::Config;
use pint_common::error::Result;
use pint_core::{InstallOptions, Installer, ResolvedPlan};

use crate::cli::header;

/// Print what installing a formula would install, dependencies first.
#[derive(Debug, Args)]
pub struct Deps {
    name: String,

    #[arg(long, help = "Plan as if building from source")]
    build_from_source: bool,
    #[arg(long, help = "Include test dependencies")]
    include_test: bool,
}

impl Deps {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let installer = Installer::new(config.clone());
        let options = InstallOptions {
            build_from_source: self.build_from_source,
            include_test: self.include_test,
            ..InstallOptions::on_request()
        };
        let (formula, pours, resolved) = installer.plan(&self.name, &options)?;

        header(&format!(
            "{} {} ({})",
            formula.name(),
            formula.version_str_full(),
            method(pours)
        ));
        if resolved.plan.is_empty() {
            println!("Nothing else to install.");
            return Ok(());
        }
        for line in plan_lines(&resolved) {
            println!("{line}");
        }
        Ok(())
    }
}

fn method(pours: bool) -> &'static str {
    if pours {
        "bottle"
    } else {
        "source"
    }
}

fn plan_lines(resolved: &ResolvedPlan) -> Vec<String> {
    resolved
        .plan
        .iter()
        .map(|entry| {
            let name = entry.formula.name();
            let pours = !resolved.source_builds.iter().any(|s| s == name);
            let mut line = format!(
                "{} {} ({})",
                name.bold(),
                entry.formula.version_str_full(),
                method(pours)
            );
            if !entry.options.is_empty() {
                line.push_str(&format!(" {}", entry.options));
            }
            line
        })
        .collect()
}
