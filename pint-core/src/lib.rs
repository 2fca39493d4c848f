// pint-core/src/lib.rs

pub mod build;
pub mod check;
pub mod fetch;
pub mod install;
pub mod interrupt;

// Re-export key types for easier use by the CLI crate
pub use install::{InstallOptions, InstallOutcome, InstallRun, Installer, ResolvedPlan};
pub use interrupt::InterruptState;
