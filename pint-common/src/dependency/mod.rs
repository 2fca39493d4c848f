pub mod definition;
pub mod expander;
pub mod requirement;

pub use definition::{merge_repeats, Dependency, DependencyExt, DependencyTag};
pub use expander::{DependencyExpander, EdgeAction, InstallPlan, PlanEntry};
pub use requirement::{Requirement, RequirementKind};
