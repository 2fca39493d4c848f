// pint-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use tracing::debug;

use super::error::{PintError, Result};

// Used when neither PINT_PREFIX nor HOMEBREW_PREFIX is set or non-empty.
const DEFAULT_FALLBACK_PREFIX: &str = "/opt/pint";

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub formula_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Developer-strict mode: pour failures are fatal instead of falling back to a source build.
    pub developer: bool,
    pub no_bottle_source_fallback: bool,
    pub forbidden_licenses: Vec<String>,
    /// Toolchain formulae needed only to produce a bottle of the root formula.
    pub bottle_dependencies: Vec<String>,
    pub sandbox: bool,
    pub bottle_tag: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading pint configuration");

        let prefix_str = env_non_empty("PINT_PREFIX")
            .or_else(|| env_non_empty("HOMEBREW_PREFIX"))
            .unwrap_or_else(|| {
                debug!(
                    "PINT_PREFIX / HOMEBREW_PREFIX not set or empty, falling back to default: {}",
                    DEFAULT_FALLBACK_PREFIX
                );
                DEFAULT_FALLBACK_PREFIX.to_string()
            });
        let prefix = expand_home(&prefix_str);
        if prefix.is_relative() {
            return Err(PintError::Config(format!(
                "prefix must be an absolute path, got '{}'",
                prefix.display()
            )));
        }
        debug!("Effective prefix set to: {}", prefix.display());

        let mut config = Self::with_prefix(&prefix);

        if let Some(dir) = env_non_empty("PINT_FORMULA_DIR") {
            config.formula_dir = expand_home(&dir);
        }
        if let Some(dir) = env_non_empty("PINT_CACHE") {
            config.cache_dir = expand_home(&dir);
        }
        config.developer = env_flag("PINT_DEVELOPER");
        config.no_bottle_source_fallback = env_flag("PINT_NO_BOTTLE_SOURCE_FALLBACK");
        config.sandbox = !env_flag("PINT_NO_SANDBOX");
        config.forbidden_licenses = env_list("PINT_FORBIDDEN_LICENSES");
        config.bottle_dependencies = env_list("PINT_BOTTLE_DEPENDENCIES");
        if let Some(tag) = env_non_empty("PINT_BOTTLE_TAG") {
            config.bottle_tag = tag;
        }

        debug!("Configuration loaded successfully: {:?}", config);
        Ok(config)
    }

    /// Configuration rooted at an arbitrary prefix with every optional behaviour at its default.
    pub fn with_prefix(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref().to_path_buf();
        Self {
            formula_dir: prefix.join("Library").join("Formula"),
            cache_dir: prefix.join("var").join("pint").join("cache"),
            prefix,
            developer: false,
            no_bottle_source_fallback: false,
            forbidden_licenses: Vec::new(),
            bottle_dependencies: Vec::new(),
            sandbox: true,
            bottle_tag: default_bottle_tag(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("var").join("pint")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir().join("locks")
    }

    pub fn pinned_dir(&self) -> PathBuf {
        self.state_dir().join("pinned")
    }

    pub fn link_backup_dir(&self) -> PathBuf {
        self.state_dir().join("link-backup")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn formula_rack_path(&self, formula_name: &str) -> PathBuf {
        self.cellar_dir().join(formula_name)
    }

    pub fn formula_keg_path(&self, formula_name: &str, version_str: &str) -> PathBuf {
        self.formula_rack_path(formula_name).join(version_str)
    }

    pub fn formula_opt_path(&self, formula_name: &str) -> PathBuf {
        self.opt_dir().join(formula_name)
    }

    pub fn formula_lock_path(&self, formula_name: &str) -> PathBuf {
        self.locks_dir().join(format!("{formula_name}.formula.lock"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_FALLBACK_PREFIX)
    }
}

/// Bottle tag of the running host, e.g. `arm64_macos` or `x86_64_linux`.
pub fn default_bottle_tag() -> String {
    let arch = match env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    };
    format!("{arch}_{}", env::consts::OS)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    matches!(
        env_non_empty(key).as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}

fn env_list(key: &str) -> Vec<String> {
    env_non_empty(key)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    PathBuf::from(raw)
}
