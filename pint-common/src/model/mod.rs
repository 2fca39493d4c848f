pub mod formula;
pub mod options;
pub mod tab;

pub use formula::Formula;
pub use options::BuildOptions;
pub use tab::Tab;
