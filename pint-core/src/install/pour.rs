// pint-core/src/install/pour.rs
// Pouring a bottle: extraction, placeholder relocation and compatibility checks.

use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use pint_common::model::tab::{host_arch, Tab};
use tempfile::NamedTempFile;
use tracing::{debug, error};
use walkdir::WalkDir;

use super::extract::extract_tar_gz;

/// Bottles are laid out as `<name>/<version>/...`.
const BOTTLE_STRIP_COMPONENTS: usize = 2;

pub fn pour_bottle(formula: &Formula, bottle_path: &Path, keg_path: &Path, config: &Config) -> Result<()> {
    if let Some(parent_dir) = keg_path.parent() {
        fs::create_dir_all(parent_dir)?;
    }
    fs::create_dir_all(keg_path).map_err(|e| {
        PintError::Io(Arc::new(std::io::Error::new(
            e.kind(),
            format!("Failed to create keg dir {}: {}", keg_path.display(), e),
        )))
    })?;

    extract_tar_gz(bottle_path, keg_path, BOTTLE_STRIP_COMPONENTS)?;
    ensure_write_permissions(keg_path);
    verify_bottle_arch(formula, keg_path)?;
    relocate_placeholders(keg_path, config)?;
    debug!(
        "Bottle pour complete for {} at {}",
        formula.name(),
        keg_path.display()
    );
    Ok(())
}

/// A bottle may ship the receipt it was built with; refuse it if it was built
/// for another architecture.
fn verify_bottle_arch(formula: &Formula, keg_path: &Path) -> Result<()> {
    let shipped = match Tab::read(keg_path) {
        Ok(tab) => tab,
        Err(e) => {
            debug!("Ignoring unreadable receipt shipped in bottle: {}", e);
            None
        }
    };
    if let Some(arch) = shipped.and_then(|t| t.arch) {
        if arch != host_arch() {
            return Err(PintError::InstallError(format!(
                "bottle for {} was built for {} but this machine is {}",
                formula.name(),
                arch,
                host_arch()
            )));
        }
    }
    Ok(())
}

fn ensure_write_permissions(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if entry.path_is_symlink() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            let mut perms = metadata.permissions();
            #[cfg(unix)]
            {
                let mode = perms.mode();
                if mode & 0o200 == 0 {
                    perms.set_mode(mode | 0o200);
                    let _ = fs::set_permissions(entry.path(), perms);
                }
            }
            #[cfg(not(unix))]
            {
                if perms.readonly() {
                    perms.set_readonly(false);
                    let _ = fs::set_permissions(entry.path(), perms);
                }
            }
        }
    }
}

/// Rewrites `@@..._PREFIX@@` style placeholders in text files. Binary files
/// are left untouched.
fn relocate_placeholders(keg_path: &Path, config: &Config) -> Result<()> {
    let prefix = config.prefix().to_string_lossy().to_string();
    let cellar = config.cellar_dir().to_string_lossy().to_string();
    let replacements = [
        ("@@HOMEBREW_CELLAR@@", cellar.as_str()),
        ("@@PINT_CELLAR@@", cellar.as_str()),
        ("@@HOMEBREW_PREFIX@@", prefix.as_str()),
        ("@@PINT_PREFIX@@", prefix.as_str()),
    ];

    let mut relocated = 0usize;
    for entry in WalkDir::new(keg_path).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                debug!("Skipping unreadable file {}: {}", path.display(), e);
                continue;
            }
        };
        if bytes.contains(&0) {
            continue;
        }
        let Ok(text) = String::from_utf8(bytes) else {
            continue;
        };
        if !text.contains("@@") {
            continue;
        }
        let mut patched = text.clone();
        for (placeholder, value) in &replacements {
            patched = patched.replace(placeholder, value);
        }
        if patched != text {
            write_text_file_atomic(path, &patched)?;
            relocated += 1;
        }
    }
    debug!("Relocated placeholders in {} files under {}", relocated, keg_path.display());
    Ok(())
}

fn write_text_file_atomic(original_path: &Path, content: &str) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        PintError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;
    let original_perms = fs::metadata(original_path).map(|m| m.permissions()).ok();

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist relocated file over {}: {}",
            original_path.display(),
            e.error
        );
        PintError::Io(Arc::new(e.error))
    })?;

    if let Some(perms) = original_perms {
        let _ = fs::set_permissions(original_path, perms);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn bottle_with(files: &[(&str, &str, u32)], dir: &Path) -> std::path::PathBuf {
        let path = dir.join("demo--1.0.bottle.tar.gz");
        let gz = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(gz);
        for (name, body, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("demo/1.0/{name}"), body.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
        path
    }

    #[test]
    fn pour_strips_layout_and_relocates_text() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(root.path());
        let bottle = bottle_with(
            &[
                ("bin/demo", "#!/bin/sh\nexec @@HOMEBREW_PREFIX@@/opt/demo/libexec/real\n", 0o555),
                ("share/demo.txt", "cellar=@@PINT_CELLAR@@\n", 0o444),
            ],
            root.path(),
        );
        let formula = Formula::new("demo", "1.0");
        let keg = config.formula_keg_path("demo", "1.0");

        pour_bottle(&formula, &bottle, &keg, &config).unwrap();

        let script = fs::read_to_string(keg.join("bin/demo")).unwrap();
        assert!(script.contains(&format!("{}/opt/demo", root.path().display())));
        let mode = fs::metadata(keg.join("bin/demo")).unwrap().permissions().mode();
        assert_ne!(mode & 0o100, 0);
        let txt = fs::read_to_string(keg.join("share/demo.txt")).unwrap();
        assert_eq!(txt, format!("cellar={}\n", config.cellar_dir().display()));
    }

    #[test]
    fn pour_rejects_foreign_architecture() {
        let root = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(root.path());
        let foreign = if host_arch() == "arm64" { "x86_64" } else { "arm64" };
        let receipt = format!(r#"{{"pint_version":"0.1.0","time":0,"arch":"{foreign}"}}"#);
        let bottle = bottle_with(&[("INSTALL_RECEIPT.json", &receipt, 0o644)], root.path());
        let keg = config.formula_keg_path("demo", "1.0");

        let err = pour_bottle(&Formula::new("demo", "1.0"), &bottle, &keg, &config).unwrap_err();
        assert!(err.to_string().contains(foreign));
    }
}
