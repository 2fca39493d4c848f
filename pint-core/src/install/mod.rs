// pint-core/src/install/mod.rs
// Entry point for installing formulae: wires the formulary, keg registry,
// fetcher, executor and checker into an `Installer` and exposes install, fetch
// and plan operations.

pub mod context;
pub mod extract;
pub mod link;
pub mod lock;
pub mod orchestrator;
pub mod planner;
pub mod pour;
pub mod recursive;
pub mod selector;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use pint_common::config::Config;
use pint_common::error::Result;
use pint_common::formulary::Formulary;
use pint_common::keg::KegRegistry;
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use pint_common::model::tab::Tab;
use tracing::{debug, warn};

pub use context::InstallRun;
pub use lock::{LockCoordinator, LockSet};
pub use orchestrator::InstallState;
pub use planner::ResolvedPlan;
pub use selector::{wants_bottle, SelectionPolicy};

use crate::build::{IsolatedExecutor, ProcessExecutor};
use crate::check::{RequirementChecker, SystemChecker};
use crate::fetch::{ArtifactFetcher, ArtifactKind, CacheFetcher};
use crate::interrupt::InterruptState;
use planner::Planner;
use selector::BottleTarget;

/// Per-request flags. Children of a request get a derived copy.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub force_bottle: bool,
    pub build_from_source: bool,
    pub build_bottle: bool,
    pub include_test: bool,
    pub keep_tmp: bool,
    pub interactive: bool,
    pub installed_as_dependency: bool,
    pub installed_on_request: bool,
    pub ignore_deps: bool,
    pub reinstall: bool,
    pub force: bool,
    pub verbose: bool,
    pub options: BuildOptions,
}

impl InstallOptions {
    /// Options for something the user named on the command line.
    pub fn on_request() -> Self {
        Self {
            installed_on_request: true,
            ..Default::default()
        }
    }

    pub(crate) fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            force_bottle: self.force_bottle,
            build_from_source: self.build_from_source,
            build_bottle: self.build_bottle,
            interactive: self.interactive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub formula: String,
    pub version: String,
    pub keg: PathBuf,
    pub tab: Option<Tab>,
    pub poured: bool,
    pub linked: bool,
    /// Satisfied by an earlier request for the same formula in this run.
    pub joined: bool,
    pub warnings: Vec<String>,
    pub caveats: Vec<String>,
}

impl InstallOutcome {
    pub(crate) fn joined(&self) -> Self {
        Self {
            joined: true,
            warnings: Vec::new(),
            caveats: Vec::new(),
            ..self.clone()
        }
    }
}

pub struct Installer {
    config: Config,
    formulary: Arc<Formulary>,
    kegs: KegRegistry,
    fetcher: Arc<dyn ArtifactFetcher>,
    executor: Arc<dyn IsolatedExecutor>,
    checker: Arc<dyn RequirementChecker>,
    locks: Arc<LockCoordinator>,
    interrupt: Arc<InterruptState>,
}

impl Installer {
    pub fn new(config: Config) -> Self {
        Self {
            formulary: Arc::new(Formulary::new(&config)),
            kegs: KegRegistry::new(config.clone()),
            fetcher: Arc::new(CacheFetcher::new(&config)),
            executor: Arc::new(ProcessExecutor::new(config.logs_dir())),
            checker: Arc::new(SystemChecker),
            locks: LockCoordinator::new(&config),
            interrupt: InterruptState::new(),
            config,
        }
    }

    pub fn with_formulary(mut self, formulary: Formulary) -> Self {
        self.formulary = Arc::new(formulary);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn IsolatedExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn RequirementChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Arc<InterruptState>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn formulary(&self) -> &Formulary {
        &self.formulary
    }

    pub fn kegs(&self) -> &KegRegistry {
        &self.kegs
    }

    pub fn fetcher(&self) -> &dyn ArtifactFetcher {
        self.fetcher.as_ref()
    }

    pub fn executor(&self) -> &dyn IsolatedExecutor {
        self.executor.as_ref()
    }

    pub fn checker(&self) -> &dyn RequirementChecker {
        self.checker.as_ref()
    }

    pub fn locks(&self) -> &Arc<LockCoordinator> {
        &self.locks
    }

    pub fn interrupt(&self) -> &Arc<InterruptState> {
        &self.interrupt
    }

    /// Starts a run; several requests installed through the same run share
    /// attempt tracking and join each other.
    pub fn run(&self) -> InstallRun<'_> {
        InstallRun::new(self)
    }

    /// Installs a single formula in a fresh run.
    pub fn install(&self, name: &str, options: InstallOptions) -> Result<InstallOutcome> {
        self.run().install(name, options)
    }

    /// Explicit options, plus whatever the newest installed keg was built
    /// with, restricted to what the formula declares.
    pub fn effective_options(&self, formula: &Formula, options: &InstallOptions) -> Result<BuildOptions> {
        let declared = formula.declared_options();
        for requested in options.options.iter() {
            if !declared.iter().any(|d| d == requested) {
                warn!("{}: ignoring unknown option --{}", formula.name(), requested);
            }
        }
        let recorded = match self.kegs.get_installed_keg(formula.name())? {
            Some(keg) => keg.tab()?.map(|t| t.used_options).unwrap_or_default(),
            None => BuildOptions::new(),
        };
        Ok(options.options.union(&recorded).intersect_declared(&declared))
    }

    /// Whether `formula` would be poured under `options`.
    pub fn wants_bottle(&self, formula: &Formula, effective: &BuildOptions, options: &InstallOptions) -> bool {
        let cellar = self.config.cellar_dir();
        let target = BottleTarget {
            tag: &self.config.bottle_tag,
            cellar: &cellar,
        };
        wants_bottle(formula, effective, &options.selection_policy(), &target)
    }

    pub(crate) fn planner<'p>(&'p self, include_test: bool, build_from_source: &'p BTreeSet<String>) -> Planner<'p> {
        Planner {
            config: &self.config,
            formulary: &self.formulary,
            kegs: &self.kegs,
            include_test,
            build_from_source,
        }
    }

    /// The dependency plan `install` would follow for `name`.
    pub fn plan(&self, name: &str, options: &InstallOptions) -> Result<(Arc<Formula>, bool, ResolvedPlan)> {
        let formula = self.formulary.resolve(name)?;
        let effective = self.effective_options(&formula, options)?;
        let pours = self.wants_bottle(&formula, &effective, options);
        let sources: BTreeSet<String> = if options.build_from_source {
            BTreeSet::from([name.to_string()])
        } else {
            BTreeSet::new()
        };
        let resolved = self
            .planner(options.include_test, &sources)
            .plan(&formula, &effective, pours)?;
        Ok((formula, pours, resolved))
    }

    /// Materializes the artifacts `install` would need for `name` and its
    /// dependencies without installing anything.
    pub fn fetch(&self, name: &str, options: &InstallOptions) -> Result<Vec<(String, PathBuf)>> {
        let (formula, pours, resolved) = self.plan(name, options)?;
        let mut fetched = Vec::new();
        for entry in resolved.plan.iter() {
            self.interrupt.check()?;
            let kind = if resolved.source_builds.iter().any(|n| n == entry.formula.name()) {
                ArtifactKind::Source
            } else {
                ArtifactKind::Bottle
            };
            let path = self.fetcher.fetch_artifact(&entry.formula, kind)?;
            fetched.push((entry.formula.name().to_string(), path));
        }
        let kind = if pours { ArtifactKind::Bottle } else { ArtifactKind::Source };
        let path = self.fetcher.fetch_artifact(&formula, kind)?;
        debug!("Fetched {} artifacts for {}", fetched.len() + 1, name);
        fetched.push((formula.name().to_string(), path));
        Ok(fetched)
    }
}
