// pint-common/src/model/tab.rs
// The installation receipt written into every keg.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::model::options::BuildOptions;

pub const TAB_FILENAME: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDependency {
    pub full_name: String,
    pub version: String,
    #[serde(default)]
    pub declared_directly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub pint_version: String,
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    #[serde(default, alias = "build_options")]
    pub used_options: BuildOptions,
    #[serde(default)]
    pub unused_options: BuildOptions,
    #[serde(default)]
    pub runtime_dependencies: Vec<RuntimeDependency>,
    #[serde(default)]
    pub installed_as_dependency: bool,
    #[serde(default)]
    pub installed_on_request: bool,
    #[serde(default)]
    pub poured_from_bottle: bool,
    #[serde(default)]
    pub built_as_bottle: bool,
    /// Unix timestamp of the install.
    #[serde(alias = "installed_time")]
    pub time: i64,
    #[serde(default, alias = "tap_origin")]
    pub tap: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

impl Tab {
    pub fn new(source_path: Option<PathBuf>, tap: Option<String>) -> Self {
        Self {
            pint_version: env!("CARGO_PKG_VERSION").to_string(),
            source_path,
            used_options: BuildOptions::new(),
            unused_options: BuildOptions::new(),
            runtime_dependencies: Vec::new(),
            installed_as_dependency: false,
            installed_on_request: false,
            poured_from_bottle: false,
            built_as_bottle: false,
            time: Utc::now().timestamp(),
            tap,
            arch: Some(host_arch().to_string()),
        }
    }

    pub fn path_in(keg: &Path) -> PathBuf {
        keg.join(TAB_FILENAME)
    }

    /// Reads the receipt of `keg`, `None` if the keg has none.
    pub fn read(keg: &Path) -> Result<Option<Tab>> {
        let path = Self::path_in(keg);
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        let tab: Tab = serde_json::from_slice(&data)?;
        Ok(Some(tab))
    }

    /// Writes the receipt atomically into `keg`.
    pub fn write(&self, keg: &Path) -> Result<()> {
        let path = Self::path_in(keg);
        debug!("Writing install receipt to {}", path.display());
        let mut tmp = tempfile::NamedTempFile::new_in(keg)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// The receipt covers `requested` if every requested option was used.
    pub fn satisfies(&self, requested: &BuildOptions) -> bool {
        self.used_options.is_superset(requested)
    }
}

/// Architecture name as recorded in receipts (`arm64`, `x86_64`).
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        other => other,
    }
}
