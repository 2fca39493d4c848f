// pint-core/src/install/context.rs
// State shared by every formula installed during one invocation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use tracing::debug;

use super::lock::LockSet;
use super::orchestrator::FormulaInstaller;
use super::{InstallOptions, InstallOutcome, Installer};

/// One invocation's worth of install attempts.
///
/// Tracks which formulae were already attempted (so a second request joins the
/// first instead of running twice), holds the locks of the top-level install,
/// and accumulates warnings and caveats for the final summary.
pub struct InstallRun<'a> {
    installer: &'a Installer,
    attempted: HashSet<String>,
    completed: HashMap<String, InstallOutcome>,
    failed: HashMap<String, PintError>,
    locks: Option<LockSet>,
    build_from_source: BTreeSet<String>,
    warnings: Vec<String>,
    caveats: Vec<(String, String)>,
}

impl<'a> InstallRun<'a> {
    pub(crate) fn new(installer: &'a Installer) -> Self {
        Self {
            installer,
            attempted: HashSet::new(),
            completed: HashMap::new(),
            failed: HashMap::new(),
            locks: None,
            build_from_source: BTreeSet::new(),
            warnings: Vec::new(),
            caveats: Vec::new(),
        }
    }

    pub fn installer(&self) -> &'a Installer {
        self.installer
    }

    /// Installs `name` as a top-level request of this run.
    pub fn install(&mut self, name: &str, options: InstallOptions) -> Result<InstallOutcome> {
        let formula = self.installer.formulary().resolve(name)?;
        self.install_formula(formula, options)
    }

    /// Drives one formula through the orchestrator. Locks acquired by a
    /// top-level install are released once it returns, whatever the outcome.
    pub(crate) fn install_formula(
        &mut self,
        formula: Arc<Formula>,
        options: InstallOptions,
    ) -> Result<InstallOutcome> {
        if options.build_from_source && !options.installed_as_dependency {
            self.build_from_source.insert(formula.name().to_string());
        }
        let name = formula.name().to_string();
        let top_level = self.locks.is_none();
        let result = FormulaInstaller::new(formula, options).install(self);
        if top_level {
            if let Some(locks) = self.locks.take() {
                debug!("Releasing locks {:?}", locks.acquired_order());
            }
        }

        match result {
            Ok(outcome) => {
                for caveat in &outcome.caveats {
                    self.caveats.push((outcome.formula.clone(), caveat.clone()));
                }
                self.warnings.extend(outcome.warnings.iter().cloned());
                self.completed.insert(outcome.formula.clone(), outcome.clone());
                Ok(outcome)
            }
            Err(PintError::AlreadyAttempted(name)) if top_level => match self.completed.get(&name) {
                Some(done) => Ok(done.joined()),
                None => match self.failed.get(&name) {
                    Some(err) => Err(err.clone()),
                    None => Err(PintError::AlreadyAttempted(name)),
                },
            },
            Err(e @ PintError::AlreadyAttempted(_)) => Err(e),
            Err(e) => {
                self.failed.entry(name).or_insert_with(|| e.clone());
                Err(e)
            }
        }
    }

    pub fn is_attempted(&self, name: &str) -> bool {
        self.attempted.contains(name)
    }

    /// Records an attempt; `false` if `name` was already attempted.
    pub(crate) fn mark_attempted(&mut self, name: &str) -> bool {
        self.attempted.insert(name.to_string())
    }

    pub fn completed(&self, name: &str) -> Option<&InstallOutcome> {
        self.completed.get(name)
    }

    /// The error an earlier attempt of `name` in this run failed with.
    pub fn failure(&self, name: &str) -> Option<&PintError> {
        self.failed.get(name)
    }

    pub(crate) fn holds_locks(&self) -> bool {
        self.locks.is_some()
    }

    pub(crate) fn set_locks(&mut self, locks: LockSet) {
        self.locks = Some(locks);
    }

    /// Locks names discovered after the top-level set was taken.
    pub(crate) fn extend_locks(&mut self, names: Vec<String>) -> Result<()> {
        let coordinator = self.installer.locks();
        match self.locks.as_mut() {
            Some(locks) => coordinator.try_extend(locks, names),
            None => {
                self.locks = Some(coordinator.acquire(names)?);
                Ok(())
            }
        }
    }

    pub(crate) fn build_from_source(&self) -> &BTreeSet<String> {
        &self.build_from_source
    }

    /// Warnings of every install in this run, in the order they were raised.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// `(formula, caveat)` pairs to show once the run is over.
    pub fn caveats(&self) -> &[(String, String)] {
        &self.caveats
    }
}
