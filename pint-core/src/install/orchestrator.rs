// pint-core/src/install/orchestrator.rs
// The per-formula install state machine:
// Pending -> Verifying -> Fetching -> Pouring|Building -> Linking
//         -> PostInstalling -> Finished, with RollingBack on any failure.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use pint_common::dependency::Dependency;
use pint_common::error::{PintError, Result};
use pint_common::keg::{InstalledKeg, REINSTALL_SUFFIX};
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use pint_common::model::tab::{RuntimeDependency, Tab};
use tracing::{debug, error, info, instrument, warn};

use super::context::InstallRun;
use super::link::{link_keg, unlink_keg};
use super::planner::{pinned_violations, ResolvedPlan};
use super::pour::pour_bottle;
use super::recursive::install_dependencies;
use super::selector::ensure_build_tools;
use super::{InstallOptions, InstallOutcome};
use crate::build;
use crate::check::{check_forbidden_licenses, evaluate_requirements, ClosureNode};
use crate::fetch::ArtifactKind;

pub const POUR_FALLBACK_WARNING: &str = "Bottle installation failed: building from source.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    Pending,
    Verifying,
    Fetching,
    Pouring,
    Building,
    Linking,
    PostInstalling,
    Finished,
    RollingBack,
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallState::Pending => "Pending",
            InstallState::Verifying => "Verifying",
            InstallState::Fetching => "Fetching",
            InstallState::Pouring => "Pouring",
            InstallState::Building => "Building",
            InstallState::Linking => "Linking",
            InstallState::PostInstalling => "PostInstalling",
            InstallState::Finished => "Finished",
            InstallState::RollingBack => "RollingBack",
        };
        f.write_str(name)
    }
}

/// Installs one formula. Created per attempt and consumed by [`install`].
///
/// [`install`]: FormulaInstaller::install
pub(crate) struct FormulaInstaller {
    formula: Arc<Formula>,
    options: InstallOptions,
    state: InstallState,
    effective_options: BuildOptions,
    pours: bool,
    poured: bool,
    keg_path: PathBuf,
    /// This attempt created `keg_path` and owns its removal on failure.
    created_keg: bool,
    reinstalling: bool,
    /// Existing same-version keg moved aside, and whether it was linked.
    displaced: Option<(PathBuf, bool)>,
    /// Keg of another version this attempt unlinked.
    previous_linked: Option<InstalledKeg>,
    plan: Option<ResolvedPlan>,
    fallback_used: bool,
    linked: bool,
    tab: Option<Tab>,
    warnings: Vec<String>,
    caveats: Vec<String>,
}

impl FormulaInstaller {
    pub(crate) fn new(formula: Arc<Formula>, options: InstallOptions) -> Self {
        Self {
            formula,
            options,
            state: InstallState::Pending,
            effective_options: BuildOptions::new(),
            pours: false,
            poured: false,
            keg_path: PathBuf::new(),
            created_keg: false,
            reinstalling: false,
            displaced: None,
            previous_linked: None,
            plan: None,
            fallback_used: false,
            linked: false,
            tab: None,
            warnings: Vec::new(),
            caveats: Vec::new(),
        }
    }

    fn name(&self) -> &str {
        self.formula.name()
    }

    #[instrument(skip_all, fields(formula = %self.formula.name()))]
    pub(crate) fn install(mut self, run: &mut InstallRun<'_>) -> Result<InstallOutcome> {
        match self.drive(run) {
            Ok(outcome) => Ok(outcome),
            Err(err @ PintError::AlreadyAttempted(_)) => Err(err),
            Err(err) => {
                self.roll_back(run, &err);
                Err(err)
            }
        }
    }

    fn transition(&mut self, run: &InstallRun<'_>, next: InstallState) -> Result<()> {
        if !matches!(next, InstallState::Finished | InstallState::RollingBack) {
            run.installer().interrupt().check()?;
        }
        debug!("[{}] {} -> {}", self.name(), self.state, next);
        self.state = next;
        Ok(())
    }

    fn drive(&mut self, run: &mut InstallRun<'_>) -> Result<InstallOutcome> {
        self.transition(run, InstallState::Verifying)?;
        if let Some(outcome) = self.verify(run)? {
            return Ok(outcome);
        }

        self.transition(run, InstallState::Fetching)?;
        if let Some(resolved) = &self.plan {
            install_dependencies(run, &resolved.plan, &self.options)?;
        }

        if self.pours {
            if let Err(err) = self.pour(run) {
                if !self.can_fall_back(run, &err) {
                    return Err(err);
                }
                self.fall_back(run, err)?;
            }
        } else {
            let source = self.fetch(run, ArtifactKind::Source)?;
            self.transition(run, InstallState::Building)?;
            self.build(run, &source)?;
        }
        self.write_tab(run)?;

        self.transition(run, InstallState::Linking)?;
        self.link(run)?;

        self.transition(run, InstallState::PostInstalling)?;
        self.post_install(run);

        self.transition(run, InstallState::Finished)?;
        Ok(self.finish(run))
    }

    /// Pre-flight checks. Returns an outcome when there is nothing to do.
    fn verify(&mut self, run: &mut InstallRun<'_>) -> Result<Option<InstallOutcome>> {
        let installer = run.installer();
        let config = installer.config();
        let kegs = installer.kegs();
        let name = self.name().to_string();
        let version = self.formula.version_str_full();

        if !run.mark_attempted(&name) {
            return Err(PintError::AlreadyAttempted(name));
        }

        if self.formula.disabled {
            return Err(PintError::FormulaDisabled {
                formula: name,
                reason: self
                    .formula
                    .disable_reason
                    .clone()
                    .unwrap_or_else(|| "it is no longer maintained".to_string()),
            });
        }
        if self.formula.deprecated {
            self.warn(format!("{name} has been deprecated!"));
        }

        if !self.options.force {
            let mut conflicts = Vec::new();
            for other in &self.formula.conflicts_with {
                if kegs.get_linked_keg(other)?.is_some() {
                    conflicts.push(other.clone());
                }
            }
            if !conflicts.is_empty() {
                return Err(PintError::FormulaConflict {
                    formula: name,
                    conflicts,
                });
            }
        }

        self.keg_path = config.formula_keg_path(&name, &version);
        if let Some(tab) = Tab::read(&self.keg_path)? {
            if !self.options.reinstall {
                let linked = kegs
                    .get_linked_keg(&name)?
                    .is_some_and(|k| k.path == self.keg_path);
                if linked {
                    self.warn(format!("{name} {version} is already installed and up-to-date."));
                } else {
                    self.warn(format!("{name} {version} is already installed, it's just not linked."));
                }
                self.linked = linked;
                self.tab = Some(tab.clone());
                return Ok(Some(self.outcome()));
            }
            self.reinstalling = true;
        }

        self.effective_options = installer.effective_options(&self.formula, &self.options)?;
        self.pours = installer.wants_bottle(&self.formula, &self.effective_options, &self.options);
        debug!(
            "[{}] effective options [{}], {}",
            name,
            self.effective_options,
            if self.pours { "pouring bottle" } else { "building from source" }
        );
        if !self.pours && self.formula.install.is_none() {
            return Err(PintError::InstallError(format!(
                "{name} has no bottle for {} and no install script to build it from source",
                config.bottle_tag
            )));
        }

        let closure = if self.options.ignore_deps {
            vec![self.root_node()]
        } else {
            let resolved = installer
                .planner(self.options.include_test, run.build_from_source())
                .plan(&self.formula, &self.effective_options, self.pours)?;

            let pinned = pinned_violations(&resolved.plan, kegs);
            if !pinned.is_empty() {
                return Err(PintError::UnsatisfiedPinnedDependency(pinned));
            }
            let closure = resolved.closure.clone();
            self.plan = Some(resolved);
            closure
        };

        let planned = self.plan.iter().flat_map(|r| r.plan.iter().map(|e| e.formula.as_ref()));
        check_forbidden_licenses(
            std::iter::once(self.formula.as_ref()).chain(planned),
            &config.forbidden_licenses,
        )?;

        let advisory = evaluate_requirements(&closure, self.options.include_test, installer.checker())
            .into_result()?;
        for message in advisory {
            self.warn(message);
        }

        let mut needs_build = Vec::new();
        if !self.pours {
            needs_build.push(name.clone());
        }
        if let Some(resolved) = &self.plan {
            needs_build.extend(resolved.source_builds.iter().cloned());
        }
        if !needs_build.is_empty() {
            ensure_build_tools(&needs_build, installer.checker().has_build_tools())?;
        }

        if !run.holds_locks() {
            let mut names = vec![name.clone()];
            if let Some(resolved) = &self.plan {
                names.extend(resolved.plan.names().into_iter().map(str::to_string));
            }
            if self.pours && !self.options.ignore_deps && self.fallback_allowed(run) {
                // A failed pour re-plans for a source build; lock that closure too.
                match installer
                    .planner(self.options.include_test, run.build_from_source())
                    .plan(&self.formula, &self.effective_options, false)
                {
                    Ok(fallback) => names.extend(fallback.plan.names().into_iter().map(str::to_string)),
                    Err(e) => debug!("[{}] no source-build plan to lock: {}", name, e),
                }
            }
            let locks = installer.locks().acquire(names)?;
            run.set_locks(locks);
        }

        if self.reinstalling {
            self.displace_existing(run)?;
        }
        Ok(None)
    }

    fn root_node(&self) -> ClosureNode {
        ClosureNode {
            formula: Arc::clone(&self.formula),
            options: self.effective_options.clone(),
            pours: self.pours,
            installed: false,
            build_only: false,
            is_root: true,
        }
    }

    /// Moves the existing same-version keg out of the way for a reinstall.
    fn displace_existing(&mut self, run: &InstallRun<'_>) -> Result<()> {
        let kegs = run.installer().kegs();
        let backup = reinstall_path(&self.keg_path);
        if backup.exists() {
            warn!("Removing stale reinstall backup {}", backup.display());
            fs::remove_dir_all(&backup)?;
        }
        let was_linked = kegs
            .get_linked_keg(self.formula.name())?
            .is_some_and(|k| k.path == self.keg_path);
        fs::rename(&self.keg_path, &backup)?;
        debug!(
            "[{}] moved existing keg aside to {}",
            self.name(),
            backup.display()
        );
        self.displaced = Some((backup, was_linked));
        Ok(())
    }

    fn fetch(&self, run: &InstallRun<'_>, kind: ArtifactKind) -> Result<PathBuf> {
        run.installer().fetcher().fetch_artifact(&self.formula, kind)
    }

    /// Starts every attempt from an empty keg directory.
    fn prepare_keg(&mut self) -> Result<()> {
        if self.keg_path.exists() {
            debug!("Clearing leftover keg at {}", self.keg_path.display());
            fs::remove_dir_all(&self.keg_path)?;
        }
        fs::create_dir_all(&self.keg_path)?;
        self.created_keg = true;
        Ok(())
    }

    fn pour(&mut self, run: &InstallRun<'_>) -> Result<()> {
        let bottle = self.fetch(run, ArtifactKind::Bottle)?;
        self.transition(run, InstallState::Pouring)?;
        info!(
            "==> Pouring {}",
            bottle.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
        );
        self.prepare_keg()?;
        pour_bottle(&self.formula, &bottle, &self.keg_path, run.installer().config())?;
        self.poured = true;
        Ok(())
    }

    fn fallback_allowed(&self, run: &InstallRun<'_>) -> bool {
        let config = run.installer().config();
        !config.developer && !config.no_bottle_source_fallback && self.formula.install.is_some()
    }

    fn can_fall_back(&self, run: &InstallRun<'_>, err: &PintError) -> bool {
        self.fallback_allowed(run) && !matches!(err, PintError::Interrupted) && !self.fallback_used
    }

    /// One-shot `Pouring -> Building` recovery. Dependencies that only the
    /// source build needs are planned and installed first.
    fn fall_back(&mut self, run: &mut InstallRun<'_>, err: PintError) -> Result<()> {
        debug!("[{}] pour failed: {}", self.name(), err);
        warn!("{}", POUR_FALLBACK_WARNING);
        self.warnings.push(POUR_FALLBACK_WARNING.to_string());
        self.fallback_used = true;
        self.pours = false;
        self.poured = false;
        self.transition(run, InstallState::Building)?;

        let installer = run.installer();
        let mut needs_build = vec![self.name().to_string()];
        if !self.options.ignore_deps || self.options.installed_as_dependency {
            let resolved = installer
                .planner(self.options.include_test, run.build_from_source())
                .plan(&self.formula, &self.effective_options, false)?;
            needs_build.extend(resolved.source_builds.iter().cloned());
            ensure_build_tools(&needs_build, installer.checker().has_build_tools())?;
            let advisory =
                evaluate_requirements(&resolved.closure, self.options.include_test, installer.checker())
                    .into_result()?;
            for message in advisory {
                self.warn(message);
            }
            run.extend_locks(resolved.plan.names().into_iter().map(str::to_string).collect())?;
            install_dependencies(run, &resolved.plan, &self.options)?;
            self.plan = Some(resolved);
        } else {
            ensure_build_tools(&needs_build, installer.checker().has_build_tools())?;
        }

        let source = self.fetch(run, ArtifactKind::Source)?;
        self.build(run, &source)
    }

    fn build(&mut self, run: &InstallRun<'_>, source: &std::path::Path) -> Result<()> {
        let installer = run.installer();
        info!("==> Building {} {} from source", self.name(), self.formula.version_str_full());
        self.prepare_keg()?;
        build::build_from_source(
            &self.formula,
            source,
            &self.keg_path,
            &self.effective_options,
            self.options.keep_tmp,
            installer.config(),
            installer.executor(),
        )?;
        Ok(())
    }

    fn write_tab(&mut self, run: &InstallRun<'_>) -> Result<()> {
        let declared: BuildOptions = self.formula.declared_options().into_iter().collect();
        let mut tab = Tab::new(self.formula.source_path.clone(), self.formula.tap.clone());
        tab.used_options = self.effective_options.clone();
        tab.unused_options = declared
            .iter()
            .filter(|o| !self.effective_options.contains(o))
            .collect();
        tab.installed_as_dependency = self.options.installed_as_dependency;
        tab.installed_on_request = self.options.installed_on_request;
        tab.poured_from_bottle = self.poured;
        tab.built_as_bottle = self.options.build_bottle;
        tab.runtime_dependencies = self.runtime_dependencies(run);
        tab.write(&self.keg_path)?;
        self.tab = Some(tab);
        Ok(())
    }

    /// Everything reachable through runtime edges, the same for a root
    /// install and for a dependency installed on its behalf.
    fn runtime_dependencies(&self, run: &InstallRun<'_>) -> Vec<RuntimeDependency> {
        let formulary = run.installer().formulary();
        let direct: HashSet<&str> = runtime_edges(&self.formula, &self.effective_options)
            .map(|d| d.name.as_str())
            .collect();

        let mut found: BTreeMap<String, Arc<Formula>> = BTreeMap::new();
        let mut queue: VecDeque<Dependency> =
            runtime_edges(&self.formula, &self.effective_options).cloned().collect();
        while let Some(dep) = queue.pop_front() {
            if dep.name == self.name() || found.contains_key(&dep.name) {
                continue;
            }
            let child = match formulary.resolve(&dep.name) {
                Ok(child) => child,
                Err(e) => {
                    debug!("[{}] leaving {} out of the receipt: {}", self.name(), dep.name, e);
                    continue;
                }
            };
            queue.extend(runtime_edges(&child, &dep.options).cloned());
            found.insert(dep.name.clone(), child);
        }

        found
            .values()
            .map(|f| RuntimeDependency {
                full_name: f.full_name(),
                version: f.version_str_full(),
                declared_directly: direct.contains(f.name()),
            })
            .collect()
    }

    fn link(&mut self, run: &InstallRun<'_>) -> Result<()> {
        let installer = run.installer();
        let config = installer.config();
        let name = self.name().to_string();

        if let Some(previous) = installer.kegs().get_linked_keg(&name)? {
            if previous.path != self.keg_path {
                info!("Unlinking {} {}", name, previous.version_str);
                unlink_keg(config, &previous.path)?;
                self.previous_linked = Some(previous);
            }
        }

        let report = link_keg(config, &name, &self.keg_path, self.formula.keg_only)?;
        if report.fully_linked() {
            self.linked = true;
        } else {
            for conflict in &report.conflicts {
                self.warn(conflict.to_string());
            }
            self.warn(format!(
                "The formula built, but is not symlinked into {}",
                config.prefix().display()
            ));
            self.linked = false;
        }
        if self.formula.keg_only {
            self.caveats.push(format!(
                "{name} is keg-only, which means it was not symlinked into {}.",
                config.prefix().display()
            ));
        }
        Ok(())
    }

    /// Failures are reported as warnings; the keg stays installed.
    fn post_install(&mut self, run: &InstallRun<'_>) {
        let installer = run.installer();
        if let Err(err) = build::run_post_install(
            &self.formula,
            &self.keg_path,
            &self.effective_options,
            installer.config(),
            installer.executor(),
        ) {
            self.warn(err.to_string());
        }
    }

    fn finish(&mut self, run: &InstallRun<'_>) -> InstallOutcome {
        if let Some(mut tab) = self.tab.take() {
            tab.runtime_dependencies = self.runtime_dependencies(run);
            if let Err(e) = tab.write(&self.keg_path) {
                warn!("Could not update receipt of {}: {}", self.name(), e);
            }
            self.tab = Some(tab);
        }
        if let Some((backup, _)) = self.displaced.take() {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!("Could not remove {}: {}", backup.display(), e);
            }
        }
        if let Some(caveats) = &self.formula.caveats {
            self.caveats.insert(0, caveats.clone());
        }
        info!(
            "{} {} installed to {}",
            self.name(),
            self.formula.version_str_full(),
            self.keg_path.display()
        );
        self.outcome()
    }

    /// Undoes what this attempt did. Runs with interrupts deferred and never
    /// replaces the error that caused it.
    fn roll_back(&mut self, run: &InstallRun<'_>, cause: &PintError) {
        if !self.created_keg && self.displaced.is_none() && self.previous_linked.is_none() {
            debug!("[{}] nothing to roll back after: {}", self.name(), cause);
            return;
        }
        let _ = self.transition(run, InstallState::RollingBack);
        let installer = run.installer();
        let config = installer.config();
        let _critical = installer.interrupt().critical();
        let name = self.name().to_string();
        warn!("Rolling back {} after: {}", name, cause);

        if self.created_keg && self.keg_path.exists() {
            if let Err(e) = unlink_keg(config, &self.keg_path) {
                error!("Rollback of {}: failed to unlink {}: {}", name, self.keg_path.display(), e);
            }
            if let Err(e) = fs::remove_dir_all(&self.keg_path) {
                error!("Rollback of {}: failed to remove {}: {}", name, self.keg_path.display(), e);
            }
        }
        if let Some((backup, was_linked)) = self.displaced.take() {
            match fs::rename(&backup, &self.keg_path) {
                Ok(()) if was_linked => {
                    if let Err(e) = link_keg(config, &name, &self.keg_path, self.formula.keg_only) {
                        error!("Rollback of {}: failed to relink restored keg: {}", name, e);
                    }
                }
                Ok(()) => {}
                Err(e) => error!(
                    "Rollback of {}: failed to restore {} from {}: {}",
                    name,
                    self.keg_path.display(),
                    backup.display(),
                    e
                ),
            }
        }
        if let Some(previous) = self.previous_linked.take() {
            if let Err(e) = link_keg(config, &name, &previous.path, self.formula.keg_only) {
                error!("Rollback of {}: failed to relink {}: {}", name, previous.version_str, e);
            }
        }
        remove_rack_if_empty(&config.formula_rack_path(&name));
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    fn outcome(&self) -> InstallOutcome {
        InstallOutcome {
            formula: self.name().to_string(),
            version: self.formula.version_str_full(),
            keg: self.keg_path.clone(),
            tab: self.tab.clone(),
            poured: self.poured,
            linked: self.linked,
            joined: false,
            warnings: self.warnings.clone(),
            caveats: self.caveats.clone(),
        }
    }
}

/// Runtime edges of `formula` that survive option pruning under `options`.
fn runtime_edges<'f>(
    formula: &'f Formula,
    options: &'f BuildOptions,
) -> impl Iterator<Item = &'f Dependency> + 'f {
    formula
        .dependencies
        .iter()
        .filter(|d| !d.is_build_or_test_only())
        .filter(move |d| !d.is_optional() || options.with(&d.name))
        .filter(move |d| !d.is_recommended() || !options.without(&d.name))
}

pub(crate) fn reinstall_path(keg_path: &std::path::Path) -> PathBuf {
    let mut name = keg_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(REINSTALL_SUFFIX);
    keg_path.with_file_name(name)
}

fn remove_rack_if_empty(rack: &std::path::Path) {
    let empty = fs::read_dir(rack)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        match fs::remove_dir(rack) {
            Ok(()) => debug!("Removed empty rack {}", rack.display()),
            Err(e) => error!("Failed to remove empty rack {}: {}", rack.display(), e),
        }
    }
}
