// pint-core/src/install/extract.rs
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use pint_common::error::{PintError, Result};
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};

struct DeferredHardLink {
    link_path: PathBuf,
    target_in_archive: PathBuf,
}

/// Extracts a `.tar.gz` archive into `target_dir`, dropping the first
/// `strip_components` path components of every entry.
pub fn extract_tar_gz(archive_path: &Path, target_dir: &Path, strip_components: usize) -> Result<()> {
    debug!(
        "Extracting archive '{}' to '{}' (strip_components={})",
        archive_path.display(),
        target_dir.display(),
        strip_components
    );
    fs::create_dir_all(target_dir)?;
    let file = File::open(archive_path).map_err(|e| {
        PintError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to open archive {}: {}", archive_path.display(), e),
        )))
    })?;
    extract_tar_archive(GzDecoder::new(file), target_dir, strip_components, archive_path)
}

fn strip_path(path: &Path, strip_components: usize, target_dir: &Path) -> std::result::Result<Option<PathBuf>, String> {
    let remaining: Vec<Component<'_>> = path.components().skip(strip_components).collect();
    if remaining.is_empty() {
        return Ok(None);
    }
    let mut out = target_dir.to_path_buf();
    for comp in remaining {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                return Err(format!("Disallowed component {:?} in archive path {}", comp, path.display()));
            }
        }
    }
    if !out.starts_with(target_dir) {
        return Err(format!("Path traversal {} -> {}", path.display(), out.display()));
    }
    Ok(Some(out))
}

fn extract_tar_archive<R: Read>(
    reader: R,
    target_dir: &Path,
    strip_components: usize,
    archive_path_for_log: &Path,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut deferred_hardlinks: Vec<DeferredHardLink> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for entry_result in archive.entries()? {
        let mut entry = entry_result.map_err(|e| {
            PintError::Generic(format!(
                "Error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;
        let original_path: PathBuf = entry
            .path()
            .map_err(|e| {
                PintError::Generic(format!(
                    "Invalid path in TAR entry from {}: {}",
                    archive_path_for_log.display(),
                    e
                ))
            })?
            .into_owned();

        let target = match strip_path(&original_path, strip_components, target_dir) {
            Ok(Some(t)) => t,
            Ok(None) => continue,
            Err(msg) => {
                error!("{} in {}", msg, archive_path_for_log.display());
                errors.push(msg);
                continue;
            }
        };

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if entry.header().entry_type() == EntryType::Link {
            match entry.link_name() {
                Ok(Some(link_target)) => deferred_hardlinks.push(DeferredHardLink {
                    link_path: target,
                    target_in_archive: link_target.into_owned(),
                }),
                _ => {
                    let msg = format!(
                        "Hardlink entry '{}' has no link target name",
                        original_path.display()
                    );
                    warn!("{}", msg);
                    errors.push(msg);
                }
            }
            continue;
        }

        if let Err(e) = entry.unpack(&target) {
            if e.kind() != io::ErrorKind::AlreadyExists {
                let msg = format!(
                    "Failed to unpack entry {} to {}: {}",
                    original_path.display(),
                    target.display(),
                    e
                );
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    for link in deferred_hardlinks {
        let source = match strip_path(&link.target_in_archive, strip_components, target_dir) {
            Ok(Some(s)) => s,
            Ok(None) | Err(_) => {
                errors.push(format!(
                    "Hardlink {} points outside the extracted tree",
                    link.link_path.display()
                ));
                continue;
            }
        };
        if link.link_path.exists() {
            let _ = fs::remove_file(&link.link_path);
        }
        if let Err(e) = fs::hard_link(&source, &link.link_path) {
            errors.push(format!(
                "Failed to create hardlink {} -> {}: {}",
                link.link_path.display(),
                source.display(),
                e
            ));
        }
    }

    if !errors.is_empty() {
        return Err(PintError::InstallError(format!(
            "Failed to extract {}: {}",
            archive_path_for_log.display(),
            errors.join("; ")
        )));
    }
    debug!("Finished extracting {}", archive_path_for_log.display());
    Ok(())
}
