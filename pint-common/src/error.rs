use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PintError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(&'static str, String),

    #[error("No available formula with the name \"{0}\"")]
    FormulaUnavailable(String),

    #[error("Circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("Unsatisfied requirements:\n  {}", .0.join("\n  "))]
    UnsatisfiedRequirements(Vec<String>),

    #[error("The following pinned formulae block this install: {}", .0.join(", "))]
    UnsatisfiedPinnedDependency(Vec<String>),

    #[error("The following formulae cannot be installed from bottles and must be built from source, but no build tools are available: {}", .0.join(", "))]
    BuildToolsError(Vec<String>),

    #[error("Could not link {formula}: target {} already exists", .path.display())]
    Conflict { formula: String, path: PathBuf },

    #[error("Cannot install {formula} because conflicting formulae are linked: {}", .conflicts.join(", "))]
    FormulaConflict {
        formula: String,
        conflicts: Vec<String>,
    },

    #[error("{formula} has been disabled: {reason}")]
    FormulaDisabled { formula: String, reason: String },

    #[error("Formula installation already attempted: {0}")]
    AlreadyAttempted(String),

    #[error("{stage} of {formula} failed ({status}), see {}", .log.display())]
    BuildFailed {
        formula: String,
        stage: String,
        status: String,
        log: PathBuf,
    },

    #[error("post-install step of {formula} failed, see {}", .log.display())]
    PostInstallFailed { formula: String, log: PathBuf },

    #[error("The installation was cancelled because the following formulae have forbidden licenses: {}", .0.join(", "))]
    ForbiddenLicense(Vec<String>),

    #[error("DownloadError: Failed to fetch '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Lock Error: {0}")]
    LockError(String),

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Installation Error: {0}")]
    InstallError(String),

    #[error("Generic Error: {0}")]
    Generic(String),
}

impl PintError {
    /// Stable identifier of the failure kind, suitable for scripting.
    pub fn kind(&self) -> &'static str {
        match self {
            PintError::Io(_) => "IoError",
            PintError::Json(_) => "JsonError",
            PintError::SemVer(_) => "VersionError",
            PintError::Config(_) => "ConfigError",
            PintError::ParseError(..) => "ParseError",
            PintError::FormulaUnavailable(_) => "FormulaUnavailable",
            PintError::CircularDependency { .. } => "CircularDependencyError",
            PintError::UnsatisfiedRequirements(_) => "UnsatisfiedRequirements",
            PintError::UnsatisfiedPinnedDependency(_) => "UnsatisfiedPinnedDependency",
            PintError::BuildToolsError(_) => "BuildToolsError",
            PintError::Conflict { .. } => "ConflictError",
            PintError::FormulaConflict { .. } => "FormulaConflictError",
            PintError::FormulaDisabled { .. } => "CannotInstallFormulaError",
            PintError::AlreadyAttempted(_) => "FormulaInstallationAlreadyAttemptedError",
            PintError::BuildFailed { .. } => "BuildError",
            PintError::PostInstallFailed { .. } => "PostInstallError",
            PintError::ForbiddenLicense(_) => "ForbiddenLicenseError",
            PintError::DownloadError(..) => "DownloadError",
            PintError::LockError(_) => "LockError",
            PintError::Interrupted => "Interrupt",
            PintError::NotFound(_) => "NotFound",
            PintError::InstallError(_) => "InstallError",
            PintError::Generic(_) => "GenericError",
        }
    }

    /// Operator-facing hint printed after the error message, if there is one.
    pub fn remediation(&self) -> Option<String> {
        match self {
            PintError::FormulaUnavailable(name) => Some(format!(
                "Check the spelling of '{name}' or add its descriptor to the formula directory."
            )),
            PintError::CircularDependency { cycle } => cycle
                .first()
                .map(|root| format!("Remove one of the dependency edges starting at '{root}'.")),
            PintError::UnsatisfiedPinnedDependency(names) => Some(
                names
                    .iter()
                    .map(|n| {
                        let name = n.split_whitespace().next().unwrap_or(n);
                        format!("pint unpin {name}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            PintError::BuildToolsError(_) => Some(
                "Install a C toolchain (e.g. the Xcode Command Line Tools or build-essential) and retry.".to_string(),
            ),
            PintError::FormulaConflict { conflicts, .. } => Some(
                conflicts
                    .iter()
                    .map(|n| format!("pint unlink {n}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            PintError::ForbiddenLicense(_) => Some(
                "Remove the licenses from PINT_FORBIDDEN_LICENSES to allow this install."
                    .to_string(),
            ),
            PintError::BuildFailed { log, .. } | PintError::PostInstallFailed { log, .. } => {
                Some(format!("Read the full log at {}", log.display()))
            }
            PintError::DownloadError(name, ..) => Some(format!(
                "Place the artifact for '{name}' in the cache directory or check connectivity."
            )),
            PintError::LockError(_) => Some(
                "Another pint process may be installing the same formulae; wait for it to finish."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PintError {
    fn from(err: std::io::Error) -> Self {
        PintError::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for PintError {
    fn from(err: serde_json::Error) -> Self {
        PintError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for PintError {
    fn from(err: semver::Error) -> Self {
        PintError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, PintError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_names_full_path() {
        let err = PintError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Circular dependency detected: a -> b -> a");
        assert_eq!(err.kind(), "CircularDependencyError");
    }

    #[test]
    fn pinned_remediation_lists_unpin_commands() {
        let err = PintError::UnsatisfiedPinnedDependency(vec![
            "openssl (pinned at 1.1)".into(),
            "zlib".into(),
        ]);
        assert_eq!(
            err.remediation().as_deref(),
            Some("pint unpin openssl\npint unpin zlib")
        );
    }
}
