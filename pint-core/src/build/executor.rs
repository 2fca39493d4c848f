// pint-core/src/build/executor.rs
// Running build and post-install scripts in a separate process so a crash in
// user code cannot take the installer down with it.

use std::fmt;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use pint_common::error::{PintError, Result};
use tracing::{debug, info};

/// Environment variables passed through when the job is sandboxed.
const SANDBOX_ENV_ALLOWLIST: [&str; 6] = ["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL", "USER"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    PostInstall,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Build => write!(f, "build"),
            Stage::PostInstall => write!(f, "post_install"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IsolatedJob {
    pub formula: String,
    pub stage: Stage,
    pub script: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub sandbox: bool,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub log_path: PathBuf,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn status_label(&self) -> String {
        match self.code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }

    /// Converts a failed outcome into the error for its stage.
    pub fn into_result(self, job: &IsolatedJob) -> Result<JobOutcome> {
        if self.success() {
            return Ok(self);
        }
        Err(match job.stage {
            Stage::Build => PintError::BuildFailed {
                formula: job.formula.clone(),
                stage: job.stage.to_string(),
                status: self.status_label(),
                log: self.log_path,
            },
            Stage::PostInstall => PintError::PostInstallFailed {
                formula: job.formula.clone(),
                log: self.log_path,
            },
        })
    }
}

/// Runs a job out of process. Spawn failures are errors; a script that exits
/// non-zero is an `Ok` outcome the caller inspects.
pub trait IsolatedExecutor: Send + Sync {
    fn run_isolated(&self, job: &IsolatedJob) -> Result<JobOutcome>;
}

/// Runs scripts with `/bin/sh`, capturing output to
/// `<logs_dir>/<formula>/<stage>.log`.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    logs_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self { logs_dir }
    }

    pub fn log_path(&self, formula: &str, stage: Stage) -> PathBuf {
        self.logs_dir.join(formula).join(format!("{stage}.log"))
    }
}

impl IsolatedExecutor for ProcessExecutor {
    fn run_isolated(&self, job: &IsolatedJob) -> Result<JobOutcome> {
        let log_path = self.log_path(&job.formula, job.stage);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = File::create(&log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new("/bin/sh");
        cmd.arg(&job.script)
            .args(&job.args)
            .current_dir(&job.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if job.sandbox {
            cmd.env_clear();
            for key in SANDBOX_ENV_ALLOWLIST {
                if let Ok(value) = std::env::var(key) {
                    cmd.env(key, value);
                }
            }
        }
        cmd.envs(job.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        info!("==> Running {} of {}", job.stage, job.formula);
        debug!(
            "Executing {} {:?} in {} (sandbox={})",
            job.script.display(),
            job.args,
            job.working_dir.display(),
            job.sandbox
        );
        let status = cmd.status().map_err(|e| {
            PintError::InstallError(format!(
                "failed to start {} of {}: {}",
                job.stage, job.formula, e
            ))
        })?;
        debug!("{} of {} finished with {}", job.stage, job.formula, status);
        Ok(JobOutcome {
            code: status.code(),
            log_path,
        })
    }
}
