// pint-core/src/build/mod.rs
// Source builds and post-install hooks, both run through an isolated executor.

pub mod executor;

use std::path::{Path, PathBuf};

use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use tracing::{debug, warn};

pub use executor::{IsolatedExecutor, IsolatedJob, JobOutcome, ProcessExecutor, Stage};

/// Environment every build and post-install script receives.
fn script_env(config: &Config, keg_path: &Path, source: Option<&Path>, options: &BuildOptions) -> Vec<(String, String)> {
    let mut env = vec![
        ("PINT_PREFIX".to_string(), config.prefix().display().to_string()),
        ("PINT_CELLAR".to_string(), config.cellar_dir().display().to_string()),
        ("PINT_KEG".to_string(), keg_path.display().to_string()),
        ("PINT_OPTIONS".to_string(), options.as_flags().join(" ")),
    ];
    if let Some(source) = source {
        env.push(("PINT_SOURCE".to_string(), source.display().to_string()));
    }
    env
}

/// Builds `formula` from `source` into `keg_path` by running its install
/// script in a scratch directory.
pub fn build_from_source(
    formula: &Formula,
    source: &Path,
    keg_path: &Path,
    options: &BuildOptions,
    keep_tmp: bool,
    config: &Config,
    executor: &dyn IsolatedExecutor,
) -> Result<JobOutcome> {
    let script = formula.install.clone().ok_or_else(|| {
        PintError::InstallError(format!("{} has no install script to build from source", formula.name()))
    })?;
    std::fs::create_dir_all(config.tmp_dir())?;
    std::fs::create_dir_all(keg_path)?;
    let workdir = tempfile::Builder::new()
        .prefix(&format!("{}-", formula.name()))
        .tempdir_in(config.tmp_dir())?;

    let job = IsolatedJob {
        formula: formula.name().to_string(),
        stage: Stage::Build,
        script,
        args: options.as_flags(),
        working_dir: workdir.path().to_path_buf(),
        sandbox: config.sandbox,
        env: script_env(config, keg_path, Some(source), options),
    };
    let result = executor.run_isolated(&job).and_then(|o| o.into_result(&job));

    if keep_tmp {
        #[allow(deprecated)]
        let kept: PathBuf = workdir.into_path();
        warn!("Temporary files retained at: {}", kept.display());
    } else {
        debug!("Removing build directory {}", workdir.path().display());
    }
    result
}

/// Runs the post-install hook of an installed keg, if the formula has one.
pub fn run_post_install(
    formula: &Formula,
    keg_path: &Path,
    options: &BuildOptions,
    config: &Config,
    executor: &dyn IsolatedExecutor,
) -> Result<Option<JobOutcome>> {
    let Some(script) = formula.post_install.clone() else {
        return Ok(None);
    };
    let job = IsolatedJob {
        formula: formula.name().to_string(),
        stage: Stage::PostInstall,
        script,
        args: Vec::new(),
        working_dir: keg_path.to_path_buf(),
        sandbox: config.sandbox,
        env: script_env(config, keg_path, None, options),
    };
    executor
        .run_isolated(&job)
        .and_then(|o| o.into_result(&job))
        .map(Some)
}
