// pint-core/src/interrupt.rs
// Deferred interrupt delivery around critical cleanup regions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use pint_common::error::{PintError, Result};
use tracing::{debug, warn};

/// Shared between the signal listener and every install running in the process.
#[derive(Debug, Default)]
pub struct InterruptState {
    pending: AtomicBool,
    critical_depth: AtomicUsize,
}

impl InterruptState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records an interrupt. It is observed at the next stage boundary that is
    /// not inside a critical region.
    pub fn raise(&self) {
        if self.critical_depth.load(Ordering::SeqCst) > 0 {
            warn!("Interrupt received during cleanup; deferring until it completes");
        }
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn in_critical_region(&self) -> bool {
        self.critical_depth.load(Ordering::SeqCst) > 0
    }

    /// Stage boundary: fails with `Interrupted` if an interrupt is pending and
    /// no critical region is active.
    pub fn check(&self) -> Result<()> {
        if self.in_critical_region() {
            return Ok(());
        }
        if self.pending.load(Ordering::SeqCst) {
            debug!("Delivering pending interrupt");
            return Err(PintError::Interrupted);
        }
        Ok(())
    }

    /// Enters a region during which interrupts are deferred.
    pub fn critical(&self) -> CriticalGuard<'_> {
        self.critical_depth.fetch_add(1, Ordering::SeqCst);
        CriticalGuard { state: self }
    }
}

pub struct CriticalGuard<'a> {
    state: &'a InterruptState,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        let previous = self.state.critical_depth.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.state.is_pending() {
            debug!("Critical region finished with an interrupt pending; re-delivering");
        }
    }
}
