// pint-common/src/lib.rs
pub mod config;
pub mod dependency;
pub mod error;
pub mod formulary;
pub mod keg;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{PintError, Result};
pub use formulary::Formulary;
pub use keg::{InstalledKeg, KegRegistry};
pub use model::{BuildOptions, Formula, Tab};
