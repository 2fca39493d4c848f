// pint-core/src/install/lock.rs
// Per-formula exclusive locks held for the duration of a top-level install.

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use fs4::FileExt;
use pint_common::config::Config;
use pint_common::error::{PintError, Result};
use tracing::{debug, error, info};

/// Hands out locks on formula names. Within one process waiting is done on a
/// condvar; across processes on an exclusive file lock per formula.
#[derive(Debug)]
pub struct LockCoordinator {
    locks_dir: PathBuf,
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockCoordinator {
    pub fn new(config: &Config) -> Arc<Self> {
        Arc::new(Self {
            locks_dir: config.locks_dir(),
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        })
    }

    /// Acquires every name in a single global (sorted) order and returns a
    /// guard releasing them all when dropped. Blocks while another holder has
    /// any of them.
    pub fn acquire<I, S>(self: &Arc<Self>, names: I) -> Result<LockSet>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ordered: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        fs::create_dir_all(&self.locks_dir)?;

        let mut set = LockSet {
            coordinator: Arc::clone(self),
            names: Vec::with_capacity(ordered.len()),
            files: Vec::with_capacity(ordered.len()),
        };
        for name in ordered {
            self.claim_in_process(&name);
            set.names.push(name.clone());
            let file = self.lock_file(&name)?;
            set.files.push(file);
        }
        debug!("Acquired install locks: {:?}", set.names);
        Ok(set)
    }

    /// Adds `names` to an existing set without waiting. Blocking here could
    /// invert the global order, so a name held elsewhere is a `LockError`.
    pub fn try_extend<I, S>(&self, set: &mut LockSet, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let missing: BTreeSet<String> = names
            .into_iter()
            .map(Into::into)
            .filter(|n| !set.contains(n))
            .collect();
        for name in missing {
            if !self.try_claim_in_process(&name) {
                return Err(PintError::LockError(format!(
                    "{name} is being installed by another request"
                )));
            }
            match self.try_lock_file(&name) {
                Ok(file) => {
                    set.names.push(name.clone());
                    set.files.push(file);
                    debug!("Extended install locks with {}", name);
                }
                Err(e) => {
                    self.release(std::slice::from_ref(&name));
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Names currently locked by any holder in this process, sorted.
    pub fn held(&self) -> Vec<String> {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = held.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    fn claim_in_process(&self, name: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while held.contains(name) {
            debug!("Waiting for in-process lock on {}", name);
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(name.to_string());
    }

    fn try_claim_in_process(&self, name: &str) -> bool {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(name.to_string())
    }

    fn open_lock_file(&self, name: &str) -> Result<(PathBuf, File)> {
        fs::create_dir_all(&self.locks_dir)?;
        let path = self.locks_dir.join(format!("{name}.formula.lock"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok((path, file))
    }

    fn try_lock_file(&self, name: &str) -> Result<File> {
        let (path, file) = self.open_lock_file(name)?;
        file.try_lock_exclusive().map_err(|e| {
            PintError::LockError(format!(
                "{name} is locked by another pint process ({}): {e}",
                path.display()
            ))
        })?;
        Ok(file)
    }

    fn lock_file(&self, name: &str) -> Result<File> {
        let (path, file) = self.open_lock_file(name)?;
        if file.try_lock_exclusive().is_err() {
            info!("Waiting for another pint process to finish with {}", name);
            file.lock_exclusive().map_err(|e| {
                PintError::LockError(format!("could not lock {}: {}", path.display(), e))
            })?;
        }
        Ok(file)
    }

    fn release(&self, names: &[String]) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for name in names {
            held.remove(name);
        }
        self.released.notify_all();
    }
}

/// Locks held by one top-level install.
#[derive(Debug)]
pub struct LockSet {
    coordinator: Arc<LockCoordinator>,
    names: Vec<String>,
    files: Vec<File>,
}

impl LockSet {
    /// Names in the order they were locked.
    pub fn acquired_order(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        for (file, name) in self.files.iter().zip(&self.names) {
            if let Err(e) = FileExt::unlock(file) {
                error!("Failed to release file lock for {}: {}", name, e);
            }
        }
        self.coordinator.release(&self.names);
        debug!("Released install locks: {:?}", self.names);
    }
}
