// pint-core/src/fetch.rs
// Materializing bottles and source archives as local files.

use std::fs;
use std::path::{Path, PathBuf};

use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Bottle,
    Source,
}

/// Produces a local path for a formula's bottle or source archive.
pub trait ArtifactFetcher: Send + Sync {
    fn fetch_artifact(&self, formula: &Formula, kind: ArtifactKind) -> Result<PathBuf>;
}

/// Resolves artifacts already present in the cache directory.
///
/// Bottles are named `<name>--<version>.<tag>.bottle.tar.gz` (or
/// `.all.bottle.tar.gz`); sources `<name>--<version>.<ext>`.
#[derive(Debug, Clone)]
pub struct CacheFetcher {
    cache_dir: PathBuf,
    bottle_tag: String,
}

impl CacheFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            bottle_tag: config.bottle_tag.clone(),
        }
    }

    pub fn bottle_filename(formula: &Formula, tag: &str) -> String {
        format!("{}--{}.{}.bottle.tar.gz", formula.name(), formula.version_str_full(), tag)
    }

    fn find_bottle(&self, formula: &Formula) -> Option<PathBuf> {
        [self.bottle_tag.as_str(), "all"]
            .iter()
            .map(|tag| self.cache_dir.join(Self::bottle_filename(formula, tag)))
            .find(|p| p.is_file())
    }

    fn find_source(&self, formula: &Formula) -> Result<Option<PathBuf>> {
        if !self.cache_dir.is_dir() {
            return Ok(None);
        }
        let stem = format!("{}--{}.", formula.name(), formula.version);
        let mut candidates: Vec<PathBuf> = fs::read_dir(&self.cache_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&stem) && !n.ends_with(".bottle.tar.gz"))
            })
            .collect();
        candidates.sort();
        Ok(candidates.into_iter().next())
    }
}

impl ArtifactFetcher for CacheFetcher {
    fn fetch_artifact(&self, formula: &Formula, kind: ArtifactKind) -> Result<PathBuf> {
        let found = match kind {
            ArtifactKind::Bottle => self.find_bottle(formula),
            ArtifactKind::Source => self.find_source(formula)?,
        };
        match found {
            Some(path) => {
                debug!("Using cached {:?} for {}: {}", kind, formula.name(), path.display());
                Ok(path)
            }
            None => Err(PintError::DownloadError(
                formula.name().to_string(),
                display_dir(&self.cache_dir),
                format!("no cached {} artifact", kind_label(kind)),
            )),
        }
    }
}

fn kind_label(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Bottle => "bottle",
        ArtifactKind::Source => "source",
    }
}

fn display_dir(dir: &Path) -> String {
    dir.display().to_string()
}
