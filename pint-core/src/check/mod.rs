pub mod devtools;
pub mod license;
pub mod requirements;

pub use license::check_forbidden_licenses;
pub use requirements::{
    evaluate_requirements, ClosureNode, RequirementChecker, RequirementReport, SystemChecker,
    UnmetRequirement,
};
