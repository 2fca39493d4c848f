// pint-core/src/install/recursive.rs
// Installing the planned dependencies of a formula, one child install each.

use std::fs;
use std::sync::Arc;

use pint_common::dependency::{InstallPlan, PlanEntry};
use pint_common::error::{PintError, Result};
use pint_common::model::tab::Tab;
use tracing::{debug, error, info, warn};

use super::context::InstallRun;
use super::link::{link_keg, unlink_keg};
use super::orchestrator::reinstall_path;
use super::InstallOptions;

/// Installs every entry of `plan`, dependencies first.
pub(crate) fn install_dependencies(
    run: &mut InstallRun<'_>,
    plan: &InstallPlan,
    parent: &InstallOptions,
) -> Result<()> {
    let installer = run.installer();
    for entry in plan.iter() {
        installer.interrupt().check()?;
        let name = entry.formula.name();
        if run.completed(name).is_some() {
            debug!("{} was already installed in this run", name);
            continue;
        }
        if let Some(err) = run.failure(name) {
            warn!("{} failed earlier in this run", name);
            return Err(err.clone());
        }
        if run.is_attempted(name) {
            debug!("{} is being installed further up this run", name);
            continue;
        }
        install_dependency(run, entry, parent)?;
    }
    Ok(())
}

fn install_dependency(run: &mut InstallRun<'_>, entry: &PlanEntry, parent: &InstallOptions) -> Result<()> {
    let installer = run.installer();
    let config = installer.config();
    let formula = &entry.formula;
    let name = formula.name();
    let keg_path = config.formula_keg_path(name, &formula.version_str_full());

    if let Some(tab) = Tab::read(&keg_path)? {
        if tab.satisfies(&entry.options) {
            debug!("{} is already satisfied", name);
            return Ok(());
        }
    }

    let previous = match installer.kegs().get_linked_keg(name)? {
        Some(keg) if keg.path != keg_path => {
            info!("Unlinking {} {}", name, keg.version_str);
            unlink_keg(config, &keg.path)?;
            Some(keg)
        }
        _ => None,
    };

    let displaced = if keg_path.exists() {
        let backup = reinstall_path(&keg_path);
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }
        fs::rename(&keg_path, &backup)?;
        debug!("Moved {} aside to {}", keg_path.display(), backup.display());
        Some(backup)
    } else {
        None
    };

    let child = InstallOptions {
        installed_as_dependency: true,
        installed_on_request: false,
        ignore_deps: true,
        options: entry.options.clone(),
        build_from_source: run.build_from_source().contains(name),
        keep_tmp: parent.keep_tmp,
        verbose: parent.verbose,
        force: parent.force,
        ..Default::default()
    };
    info!("==> Installing dependency: {}", name);

    match run.install_formula(Arc::clone(formula), child) {
        Ok(_) => {
            if let Some(backup) = displaced {
                if let Err(e) = fs::remove_dir_all(&backup) {
                    warn!("Could not remove {}: {}", backup.display(), e);
                }
            }
            Ok(())
        }
        Err(PintError::AlreadyAttempted(other)) => {
            debug!("{} joined an attempt already in progress", other);
            Ok(())
        }
        Err(err) => {
            let _critical = installer.interrupt().critical();
            if let Some(backup) = displaced {
                if keg_path.exists() {
                    if let Err(e) = fs::remove_dir_all(&keg_path) {
                        error!("Failed to clear {}: {}", keg_path.display(), e);
                    }
                }
                if let Err(e) = fs::rename(&backup, &keg_path) {
                    error!(
                        "Failed to restore {} from {}: {}",
                        keg_path.display(),
                        backup.display(),
                        e
                    );
                }
            }
            if let Some(keg) = previous {
                if let Err(e) = link_keg(config, name, &keg.path, formula.keg_only) {
                    error!("Failed to relink {} {}: {}", name, keg.version_str, e);
                }
            }
            Err(err)
        }
    }
}
