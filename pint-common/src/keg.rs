// pint-common/src/keg.rs
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::config::Config;
use super::error::{PintError, Result};
use super::model::options::BuildOptions;
use super::model::tab::Tab;

/// Suffix given to an existing keg while a reinstall of the same version runs.
pub const REINSTALL_SUFFIX: &str = ".reinstall";

/// Represents information about an installed package (Keg).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKeg {
    pub name: String,
    pub version_str: String,
    pub path: PathBuf,
}

impl InstalledKeg {
    pub fn tab(&self) -> Result<Option<Tab>> {
        Tab::read(&self.path)
    }
}

/// Manages querying installed packages in the Cellar.
#[derive(Debug, Clone)]
pub struct KegRegistry {
    config: Config,
}

impl KegRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn cellar_path(&self) -> PathBuf {
        self.config.cellar_dir()
    }

    pub fn get_opt_path(&self, name: &str) -> PathBuf {
        self.config.formula_opt_path(name)
    }

    pub fn get_keg_path(&self, name: &str, version_str: &str) -> PathBuf {
        self.config.formula_keg_path(name, version_str)
    }

    /// All kegs of `name`, oldest first.
    pub fn list_kegs(&self, name: &str) -> Result<Vec<InstalledKeg>> {
        let rack = self.config.formula_rack_path(name);
        if !rack.is_dir() {
            debug!("[KEG_REGISTRY:{}] rack {} not present", name, rack.display());
            return Ok(Vec::new());
        }

        let mut kegs = Vec::new();
        for entry in fs::read_dir(&rack)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(
                        "[KEG_REGISTRY:{}] Error reading an entry in '{}': {}. Skipping entry.",
                        name,
                        rack.display(),
                        e
                    );
                    continue;
                }
            };
            let path = entry.path();
            let Some(version_str) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if version_str.starts_with('.') || version_str.ends_with(REINSTALL_SUFFIX) {
                debug!("[KEG_REGISTRY:{}] ignoring {}", name, path.display());
                continue;
            }
            if !path.is_dir() {
                continue;
            }
            kegs.push(InstalledKeg {
                name: name.to_string(),
                version_str: version_str.to_string(),
                path: path.clone(),
            });
        }
        kegs.sort_by(|a, b| compare_versions(&a.version_str, &b.version_str));
        debug!(
            "[KEG_REGISTRY:{}] found kegs: {:?}",
            name,
            kegs.iter().map(|k| &k.version_str).collect::<Vec<_>>()
        );
        Ok(kegs)
    }

    /// Newest keg of `name` that carries an install receipt.
    pub fn get_installed_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        let kegs = self.list_kegs(name)?;
        let latest = kegs
            .into_iter()
            .rev()
            .find(|k| Tab::path_in(&k.path).is_file());
        if latest.is_none() {
            debug!("[KEG_REGISTRY:{}] no complete keg installed", name);
        }
        Ok(latest)
    }

    pub fn list_installed_kegs(&self) -> Result<Vec<InstalledKeg>> {
        let cellar = self.cellar_path();
        if !cellar.is_dir() {
            return Ok(Vec::new());
        }
        let mut all = Vec::new();
        for entry in fs::read_dir(&cellar)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                all.extend(self.list_kegs(name)?);
            }
        }
        Ok(all)
    }

    /// Keg the `opt/<name>` link currently points at.
    pub fn get_linked_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        let opt = self.get_opt_path(name);
        let target = match fs::read_link(&opt) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };
        let target = if target.is_relative() {
            opt.parent().unwrap_or(Path::new("/")).join(target)
        } else {
            target
        };
        if !target.is_dir() {
            warn!(
                "[KEG_REGISTRY:{}] opt link {} is dangling",
                name,
                opt.display()
            );
            return Ok(None);
        }
        let version_str = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PintError::Generic(format!("bad opt link for {name}")))?
            .to_string();
        Ok(Some(InstalledKeg {
            name: name.to_string(),
            version_str,
            path: target,
        }))
    }

    pub fn pin_path(&self, name: &str) -> PathBuf {
        self.config.pinned_dir().join(name)
    }

    pub fn is_pinned(&self, name: &str) -> bool {
        fs::symlink_metadata(self.pin_path(name)).is_ok()
    }

    /// Version a pinned formula is held at.
    pub fn pinned_version(&self, name: &str) -> Option<String> {
        let target = fs::read_link(self.pin_path(name)).ok()?;
        target
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }

    /// Pins `name` at the given keg.
    pub fn pin(&self, keg: &InstalledKeg) -> Result<()> {
        let path = self.pin_path(&keg.name);
        fs::create_dir_all(self.config.pinned_dir())?;
        if fs::symlink_metadata(&path).is_ok() {
            fs::remove_file(&path)?;
        }
        std::os::unix::fs::symlink(&keg.path, &path)?;
        Ok(())
    }

    /// True when some installed keg of `name` was built with at least `options`.
    pub fn satisfies(&self, name: &str, options: &BuildOptions) -> Result<bool> {
        for keg in self.list_kegs(name)?.iter().rev() {
            match keg.tab() {
                Ok(Some(tab)) if tab.satisfies(options) => return Ok(true),
                Ok(_) => {}
                Err(e) => warn!(
                    "[KEG_REGISTRY:{}] unreadable receipt in {}: {}",
                    name,
                    keg.path.display(),
                    e
                ),
            }
        }
        Ok(false)
    }
}

/// Orders keg version strings (`1.10.0_1` after `1.9.3`), falling back to
/// plain string order for versions that are not dotted numbers.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

fn parse_version(s: &str) -> Option<(semver::Version, u32)> {
    let (base, revision) = match s.rsplit_once('_') {
        Some((base, rev)) => (base, rev.parse().ok()?),
        None => (s, 0),
    };
    let mut parts: Vec<&str> = base.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    if parts.len() > 3 {
        return None;
    }
    let version = semver::Version::parse(&parts.join(".")).ok()?;
    Some((version, revision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_understands_revisions() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("1.2_1", "1.2"), Ordering::Greater);
        assert_eq!(compare_versions("2024-01", "2023-12"), Ordering::Greater);
    }

    #[test]
    fn only_kegs_with_receipts_count_as_installed() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(root.path());
        let registry = KegRegistry::new(config.clone());

        let partial = config.formula_keg_path("zlib", "1.3.1");
        fs::create_dir_all(&partial).unwrap();
        fs::create_dir_all(config.formula_keg_path("zlib", "1.3.1.reinstall")).unwrap();
        assert!(registry.get_installed_keg("zlib").unwrap().is_none());

        let complete = config.formula_keg_path("zlib", "1.2.13");
        fs::create_dir_all(&complete).unwrap();
        let mut tab = Tab::new(None, None);
        tab.used_options.insert("with-x");
        tab.write(&complete).unwrap();

        let keg = registry.get_installed_keg("zlib").unwrap().unwrap();
        assert_eq!(keg.version_str, "1.2.13");
        assert!(registry.satisfies("zlib", &["with-x"].into_iter().collect()).unwrap());
        assert!(!registry.satisfies("zlib", &["with-y"].into_iter().collect()).unwrap());
        assert_eq!(registry.list_kegs("zlib").unwrap().len(), 2);

        registry.pin(&keg).unwrap();
        assert!(registry.is_pinned("zlib"));
        assert_eq!(registry.pinned_version("zlib").as_deref(), Some("1.2.13"));
    }
}
