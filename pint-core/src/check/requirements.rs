// pint-core/src/check/requirements.rs
// Deciding which declared requirements matter for this install and whether
// the host meets them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use pint_common::dependency::{DependencyTag, Requirement, RequirementKind};
use pint_common::error::{PintError, Result};
use pint_common::keg::compare_versions;
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use pint_common::model::tab::host_arch;
use tracing::{debug, warn};

use super::devtools;

/// Host checks used by the evaluator. Tests substitute their own.
pub trait RequirementChecker: Send + Sync {
    fn check_requirement(&self, requirement: &Requirement) -> bool;
    fn has_build_tools(&self) -> bool;
}

/// Checks requirements against the running machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemChecker;

impl RequirementChecker for SystemChecker {
    fn check_requirement(&self, requirement: &Requirement) -> bool {
        match &requirement.kind {
            RequirementKind::MacOS(min) => devtools::macos_version()
                .is_some_and(|v| compare_versions(&v, min) != Ordering::Less),
            RequirementKind::Xcode(min) => match (devtools::xcode_version(), min) {
                (Some(v), Some(min)) => compare_versions(&v, min) != Ordering::Less,
                (Some(_), None) => true,
                (None, _) => false,
            },
            RequirementKind::Arch(arch) => normalize_arch(arch) == host_arch(),
            RequirementKind::Executable(exe) => which::which(exe).is_ok(),
            RequirementKind::Other(name) => {
                debug!("No check for requirement '{}'; treating it as unmet", name);
                false
            }
        }
    }

    fn has_build_tools(&self) -> bool {
        devtools::has_build_toolchain()
    }
}

fn normalize_arch(arch: &str) -> &str {
    match arch {
        "arm" | "aarch64" => "arm64",
        "intel" => "x86_64",
        other => other,
    }
}

/// One formula of the closure being evaluated.
#[derive(Debug, Clone)]
pub struct ClosureNode {
    pub formula: Arc<Formula>,
    pub options: BuildOptions,
    /// Will be poured from a bottle in this run.
    pub pours: bool,
    /// Already installed and left alone by this run.
    pub installed: bool,
    /// Reached only through build or test edges.
    pub build_only: bool,
    pub is_root: bool,
}

#[derive(Debug, Clone)]
pub struct UnmetRequirement {
    pub dependent: String,
    pub requirement: Requirement,
}

impl fmt::Display for UnmetRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.dependent,
            self.requirement,
            self.requirement.message()
        )
    }
}

#[derive(Debug, Default)]
pub struct RequirementReport {
    pub fatal: Vec<UnmetRequirement>,
    pub advisory: Vec<UnmetRequirement>,
}

impl RequirementReport {
    /// Fails with every fatal requirement at once; otherwise hands back the
    /// advisory messages as warnings.
    pub fn into_result(self) -> Result<Vec<String>> {
        if !self.fatal.is_empty() {
            return Err(PintError::UnsatisfiedRequirements(
                self.fatal.iter().map(ToString::to_string).collect(),
            ));
        }
        Ok(self.advisory.iter().map(ToString::to_string).collect())
    }
}

/// Evaluates the requirements of every node in `closure`.
///
/// Build and test requirements only count when the formula that declares them
/// will actually be built (or tested, for the root with `include_test`). A
/// requirement declared by an already-installed build-only dependency never
/// counts.
pub fn evaluate_requirements(
    closure: &[ClosureNode],
    include_test: bool,
    checker: &dyn RequirementChecker,
) -> RequirementReport {
    let mut report = RequirementReport::default();
    for node in closure {
        if node.build_only && node.installed {
            debug!(
                "Skipping requirements of installed build dependency {}",
                node.formula.name()
            );
            continue;
        }
        for req in &node.formula.requirements {
            if !is_relevant(node, req, include_test) {
                debug!("[{}] requirement {} not needed for this install", node.formula.name(), req);
                continue;
            }
            if checker.check_requirement(req) {
                debug!("[{}] requirement {} satisfied", node.formula.name(), req);
                continue;
            }
            let unmet = UnmetRequirement {
                dependent: node.formula.name().to_string(),
                requirement: req.clone(),
            };
            if req.fatal {
                report.fatal.push(unmet);
            } else {
                warn!("{}", unmet);
                report.advisory.push(unmet);
            }
        }
    }
    report
}

fn is_relevant(node: &ClosureNode, req: &Requirement, include_test: bool) -> bool {
    let build_or_test_only = req.tags.intersects(DependencyTag::BUILD | DependencyTag::TEST)
        && !req.tags.contains(DependencyTag::RUNTIME);
    if !build_or_test_only {
        return true;
    }
    let keep_test = req.is_test() && include_test && node.is_root;
    let keep_build = req.is_build() && !node.pours && !node.installed;
    keep_test || keep_build
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        satisfied: bool,
    }

    impl RequirementChecker for Fixed {
        fn check_requirement(&self, _: &Requirement) -> bool {
            self.satisfied
        }
        fn has_build_tools(&self) -> bool {
            true
        }
    }

    fn node(formula: Formula, pours: bool) -> ClosureNode {
        ClosureNode {
            formula: Arc::new(formula),
            options: BuildOptions::new(),
            pours,
            installed: false,
            build_only: false,
            is_root: true,
        }
    }

    fn with_build_xcode() -> Formula {
        Formula::new("app", "1.0").requires(
            Requirement::new(RequirementKind::Xcode(Some("15.0".into())))
                .with_tags(DependencyTag::BUILD),
        )
    }

    #[test]
    fn build_requirement_ignored_when_pouring() {
        let report = evaluate_requirements(&[node(with_build_xcode(), true)], false, &Fixed { satisfied: false });
        assert!(report.fatal.is_empty());
        assert!(report.into_result().unwrap().is_empty());
    }

    #[test]
    fn build_requirement_fatal_when_building() {
        let report = evaluate_requirements(&[node(with_build_xcode(), false)], false, &Fixed { satisfied: false });
        match report.into_result() {
            Err(PintError::UnsatisfiedRequirements(msgs)) => {
                assert_eq!(msgs.len(), 1);
                assert!(msgs[0].starts_with("app"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn runtime_requirement_checked_even_when_pouring() {
        let formula = Formula::new("app", "1.0")
            .requires(Requirement::new(RequirementKind::MacOS("13.0".into())))
            .requires(Requirement::new(RequirementKind::Executable("git".into())).advisory());
        let report = evaluate_requirements(&[node(formula.clone(), true)], false, &Fixed { satisfied: false });
        assert_eq!(report.fatal.len(), 1);
        assert_eq!(report.advisory.len(), 1);

        let ok = evaluate_requirements(&[node(formula, true)], false, &Fixed { satisfied: true });
        assert!(ok.fatal.is_empty() && ok.advisory.is_empty());
    }

    #[test]
    fn test_requirement_only_for_root_with_include_test() {
        let formula = Formula::new("app", "1.0").requires(
            Requirement::new(RequirementKind::Executable("python3".into()))
                .with_tags(DependencyTag::TEST),
        );
        let checker = Fixed { satisfied: false };
        assert!(evaluate_requirements(&[node(formula.clone(), true)], false, &checker).fatal.is_empty());
        assert_eq!(evaluate_requirements(&[node(formula.clone(), true)], true, &checker).fatal.len(), 1);

        let mut dep = node(formula, true);
        dep.is_root = false;
        assert!(evaluate_requirements(&[dep], true, &checker).fatal.is_empty());
    }

    #[test]
    fn installed_build_only_dependency_is_pruned() {
        let formula = Formula::new("cmake", "3.29")
            .requires(Requirement::new(RequirementKind::MacOS("99.0".into())));
        let mut dep = node(formula, false);
        dep.is_root = false;
        dep.build_only = true;
        dep.installed = true;
        assert!(evaluate_requirements(&[dep], false, &Fixed { satisfied: false }).fatal.is_empty());
    }

    #[test]
    fn arch_aliases_are_normalized() {
        let req = Requirement::new(RequirementKind::Arch(
            if host_arch() == "arm64" { "arm" } else { "x86_64" }.into(),
        ));
        assert!(SystemChecker.check_requirement(&req));
    }
}
