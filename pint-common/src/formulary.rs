use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error};

use super::config::Config;
use super::error::{PintError, Result};
use super::model::formula::Formula;

/// Loads formula descriptors by name and hands out one shared instance per
/// name for the lifetime of the formulary.
pub struct Formulary {
    formula_dir: Option<PathBuf>,
    parsed_cache: Mutex<HashMap<String, Arc<Formula>>>,
}

impl Formulary {
    pub fn new(config: &Config) -> Self {
        Self {
            formula_dir: Some(config.formula_dir.clone()),
            parsed_cache: Mutex::new(HashMap::new()),
        }
    }

    /// In-memory formulary; names not in `formulae` are unavailable.
    pub fn from_formulae(formulae: impl IntoIterator<Item = Formula>) -> Self {
        let parsed = formulae
            .into_iter()
            .map(|f| (f.name.clone(), Arc::new(f)))
            .collect();
        Self {
            formula_dir: None,
            parsed_cache: Mutex::new(parsed),
        }
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Formula>> {
        let mut cache = self
            .parsed_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(formula) = cache.get(name) {
            debug!("Loaded formula '{}' from parsed cache.", name);
            return Ok(Arc::clone(formula));
        }

        let dir = self
            .formula_dir
            .as_deref()
            .ok_or_else(|| PintError::FormulaUnavailable(name.to_string()))?;
        let formula = Arc::new(load_descriptor(dir, name)?);
        debug!(
            "Successfully loaded formula '{}' version {}",
            formula.name,
            formula.version_str_full()
        );
        cache.insert(name.to_string(), Arc::clone(&formula));
        Ok(formula)
    }
}

fn load_descriptor(dir: &Path, name: &str) -> Result<Formula> {
    if name.is_empty() || name.contains('/') || name.starts_with('.') {
        return Err(PintError::FormulaUnavailable(name.to_string()));
    }
    let path = dir.join(format!("{name}.json"));
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!("No descriptor for '{}' at {}: {}", name, path.display(), e);
            return Err(PintError::FormulaUnavailable(name.to_string()));
        }
    };
    let mut formula: Formula = serde_json::from_slice(&raw).map_err(|e| {
        error!("Failed to parse formula descriptor {}: {}", path.display(), e);
        PintError::FormulaUnavailable(name.to_string())
    })?;
    if formula.name != name {
        error!(
            "Descriptor {} declares name '{}', expected '{}'",
            path.display(),
            formula.name,
            name
        );
        return Err(PintError::FormulaUnavailable(name.to_string()));
    }

    // Script paths are relative to the descriptor.
    formula.install = formula.install.take().map(|p| dir.join(p));
    formula.post_install = formula.post_install.take().map(|p| dir.join(p));
    formula.source_path = Some(path);
    Ok(formula)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_descriptor_once_and_anchors_scripts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("jq.json"),
            r#"{"name": "jq", "version": "1.7.1", "install": "jq.sh"}"#,
        )
        .unwrap();
        let mut config = Config::with_prefix(dir.path());
        config.formula_dir = dir.path().to_path_buf();
        let formulary = Formulary::new(&config);

        let first = formulary.resolve("jq").unwrap();
        let second = formulary.resolve("jq").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.install.as_deref(), Some(dir.path().join("jq.sh").as_path()));

        let err = formulary.resolve("nope").unwrap_err();
        assert_eq!(err.kind(), "FormulaUnavailable");
    }
}
