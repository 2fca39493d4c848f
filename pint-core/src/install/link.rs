// pint-core/src/install/link.rs
// The opt link and the symlink farm from a keg into the shared prefix.

use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

const LINKED_DIRS: [&str; 7] = ["bin", "sbin", "lib", "include", "share", "etc", "Frameworks"];
pub const MANIFEST_FILENAME: &str = "INSTALL_MANIFEST.json";

#[derive(Debug, Default)]
pub struct LinkReport {
    /// Links created, the opt link first.
    pub links: Vec<PathBuf>,
    /// `(original location, backup location)` of non-keg files moved aside.
    pub backed_up: Vec<(PathBuf, PathBuf)>,
    /// Paths that still collided after one backup-and-retry.
    pub conflicts: Vec<PintError>,
}

impl LinkReport {
    pub fn fully_linked(&self) -> bool {
        self.conflicts.is_empty()
    }
}

enum LinkAttempt {
    Linked,
    AlreadyLinked,
    Collision,
}

/// Links `keg_path` into the prefix. Collisions with files that do not belong
/// to any keg are backed up and retried once per path; what still collides is
/// reported in [`LinkReport::conflicts`] and the farm is rolled back to just
/// the opt link.
pub fn link_keg(config: &Config, formula_name: &str, keg_path: &Path, keg_only: bool) -> Result<LinkReport> {
    debug!("Linking {} from {}", formula_name, keg_path.display());
    let mut report = LinkReport::default();

    let opt_link = config.formula_opt_path(formula_name);
    fs::create_dir_all(config.opt_dir())?;
    if !replace_symlink(&opt_link, keg_path)? {
        let relative = Path::new("opt").join(formula_name);
        let retried = match back_up(config, &relative, &opt_link)? {
            Some(backup) => {
                report.backed_up.push((opt_link.clone(), backup));
                replace_symlink(&opt_link, keg_path)?
            }
            None => false,
        };
        if !retried {
            warn!("Could not link {}: {} already exists", formula_name, opt_link.display());
            report.conflicts.push(PintError::Conflict {
                formula: formula_name.to_string(),
                path: opt_link,
            });
            write_install_manifest(keg_path, &report.links)?;
            return Ok(report);
        }
    }
    report.links.push(opt_link.clone());

    if keg_only {
        debug!("{} is keg-only; only the opt link was created", formula_name);
        write_install_manifest(keg_path, &report.links)?;
        return Ok(report);
    }

    let cellar = config.cellar_dir();
    for dir_name in LINKED_DIRS {
        let source_root = keg_path.join(dir_name);
        if !source_root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&source_root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| PintError::Generic(format!("walking {}: {e}", source_root.display())))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let source = entry.path().to_path_buf();
            let relative = source
                .strip_prefix(keg_path)
                .map_err(|e| PintError::Generic(e.to_string()))?
                .to_path_buf();
            if relative.file_name().is_some_and(|n| n.to_string_lossy().starts_with('.')) {
                continue;
            }
            let target = config.prefix().join(&relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }

            match try_link(&target, &source, &cellar)? {
                LinkAttempt::Linked | LinkAttempt::AlreadyLinked => report.links.push(target),
                LinkAttempt::Collision => {
                    if !is_keg_owned(&target, &cellar) {
                        if let Some(backup) = back_up(config, &relative, &target)? {
                            report.backed_up.push((target.clone(), backup));
                            if let LinkAttempt::Linked = try_link(&target, &source, &cellar)? {
                                report.links.push(target);
                                continue;
                            }
                        }
                    }
                    warn!("Could not link {}: {} already exists", formula_name, target.display());
                    report.conflicts.push(PintError::Conflict {
                        formula: formula_name.to_string(),
                        path: target,
                    });
                }
            }
        }
    }

    if !report.conflicts.is_empty() {
        // Leave only the opt link so dependents still resolve this keg.
        for link in report.links.drain(1..) {
            if let Err(e) = fs::remove_file(&link) {
                error!("Failed to remove link {}: {}", link.display(), e);
            }
        }
        restore_backups(&mut report.backed_up, &opt_link);
    }
    write_install_manifest(keg_path, &report.links)?;
    Ok(report)
}

fn try_link(target: &Path, source: &Path, cellar: &Path) -> Result<LinkAttempt> {
    match fs::symlink_metadata(target) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            unix_fs::symlink(source, target)?;
            debug!("  Linked {} -> {}", target.display(), source.display());
            Ok(LinkAttempt::Linked)
        }
        Err(e) => Err(e.into()),
        Ok(meta) if meta.file_type().is_symlink() => {
            let current = fs::read_link(target)?;
            if current == source {
                return Ok(LinkAttempt::AlreadyLinked);
            }
            // Dangling links, or links into kegs that no longer exist, are stale.
            if !target.exists() || (current.starts_with(cellar) && !current.exists()) {
                fs::remove_file(target)?;
                unix_fs::symlink(source, target)?;
                return Ok(LinkAttempt::Linked);
            }
            Ok(LinkAttempt::Collision)
        }
        Ok(_) => Ok(LinkAttempt::Collision),
    }
}

fn is_keg_owned(target: &Path, cellar: &Path) -> bool {
    fs::read_link(target)
        .map(|dest| dest.starts_with(cellar))
        .unwrap_or(false)
}

fn back_up(config: &Config, relative: &Path, target: &Path) -> Result<Option<PathBuf>> {
    let mut backup = config.link_backup_dir().join(relative);
    if fs::symlink_metadata(&backup).is_ok() {
        let stamped = format!(
            "{}.{}",
            backup.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
            Utc::now().timestamp()
        );
        backup.set_file_name(stamped);
    }
    if let Some(parent) = backup.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(target, &backup) {
        Ok(()) => {
            warn!("Moved conflicting {} to {}", target.display(), backup.display());
            Ok(Some(backup))
        }
        Err(e) => {
            error!("Could not back up {}: {}", target.display(), e);
            Ok(None)
        }
    }
}

/// Moves files backed up during a degraded link back where they were. The
/// backup of the opt path stays, since the opt link is kept.
fn restore_backups(backed_up: &mut Vec<(PathBuf, PathBuf)>, opt_link: &Path) {
    backed_up.retain(|(original, backup)| {
        if original == opt_link {
            return true;
        }
        match fs::rename(backup, original) {
            Ok(()) => {
                debug!("Restored {} from {}", original.display(), backup.display());
                false
            }
            Err(e) => {
                error!(
                    "Failed to restore {} from {}: {}",
                    original.display(),
                    backup.display(),
                    e
                );
                true
            }
        }
    });
}

/// Points `link` at `target`. Returns `false` when something other than a
/// symlink occupies `link`.
fn replace_symlink(link: &Path, target: &Path) -> Result<bool> {
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(link)?,
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    unix_fs::symlink(target, link)?;
    Ok(true)
}

fn write_install_manifest(keg_path: &Path, links: &[PathBuf]) -> Result<()> {
    let manifest_path = keg_path.join(MANIFEST_FILENAME);
    let json = serde_json::to_string_pretty(links)?;
    fs::write(&manifest_path, json)?;
    debug!(
        "Wrote install manifest with {} links: {}",
        links.len(),
        manifest_path.display()
    );
    Ok(())
}

/// Removes every link recorded in the keg's manifest that still points into
/// the keg. Returns the number of links removed.
pub fn unlink_keg(config: &Config, keg_path: &Path) -> Result<usize> {
    let manifest_path = keg_path.join(MANIFEST_FILENAME);
    let links: Vec<PathBuf> = match fs::read_to_string(&manifest_path) {
        Ok(raw) => serde_json::from_str(&raw)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No install manifest at {}", manifest_path.display());
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for link in links {
        if !link.starts_with(config.prefix()) || link.starts_with(config.cellar_dir()) {
            error!("Manifest contains unexpected link path, skipping removal: {}", link.display());
            continue;
        }
        match fs::read_link(&link) {
            Ok(dest) if dest.starts_with(keg_path) => {
                fs::remove_file(&link)?;
                removed += 1;
            }
            Ok(_) => debug!("{} no longer points into {}", link.display(), keg_path.display()),
            Err(_) => {}
        }
    }
    fs::remove_file(&manifest_path)?;
    debug!("Unlinked {} links of {}", removed, keg_path.display());
    Ok(removed)
}
