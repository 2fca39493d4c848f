// pint-core/src/install/planner.rs
// Turns a root formula into the list of dependencies this run must install,
// applying the pruning rules for options, build/test edges and kegs that are
// already in place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pint_common::config::Config;
use pint_common::dependency::{
    merge_repeats, Dependency, DependencyExpander, EdgeAction, InstallPlan,
};
use pint_common::error::Result;
use pint_common::formulary::Formulary;
use pint_common::keg::KegRegistry;
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use pint_common::model::tab::Tab;
use tracing::debug;

use super::selector::{wants_bottle, BottleTarget, SelectionPolicy};
use crate::check::ClosureNode;

pub struct Planner<'a> {
    pub config: &'a Config,
    pub formulary: &'a Formulary,
    pub kegs: &'a KegRegistry,
    pub include_test: bool,
    /// Dependencies the user asked to build from source in this run.
    pub build_from_source: &'a BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedPlan {
    pub plan: InstallPlan,
    /// The root followed by every formula reached through a kept edge.
    pub closure: Vec<ClosureNode>,
    /// Planned dependencies that will be built rather than poured.
    pub source_builds: Vec<String>,
}

#[derive(Debug)]
struct Reached {
    formula: Arc<Formula>,
    options: BuildOptions,
    build_only: bool,
}

impl<'a> Planner<'a> {
    /// Policy applied to a dependency: only `build_from_source` carries over,
    /// and only for names the user listed.
    pub fn dependency_policy(&self, name: &str) -> SelectionPolicy {
        SelectionPolicy {
            build_from_source: self.build_from_source.contains(name),
            ..Default::default()
        }
    }

    pub fn dependency_pours(&self, formula: &Formula, options: &BuildOptions) -> bool {
        let cellar = self.config.cellar_dir();
        let target = BottleTarget {
            tag: &self.config.bottle_tag,
            cellar: &cellar,
        };
        wants_bottle(formula, options, &self.dependency_policy(formula.name()), &target)
    }

    /// The keg for this exact version exists and was built with `options`.
    pub fn installed_current(&self, formula: &Formula, options: &BuildOptions) -> Result<bool> {
        let keg = self
            .kegs
            .get_keg_path(formula.name(), &formula.version_str_full());
        Ok(Tab::read(&keg)?.is_some_and(|tab| tab.satisfies(options)))
    }

    pub fn plan(
        &self,
        root: &Arc<Formula>,
        root_options: &BuildOptions,
        root_pours: bool,
    ) -> Result<ResolvedPlan> {
        let (mut plan, mut reached) =
            self.expand(root, root_options, root_pours, &root.dependencies)?;

        let supplements = self.bottle_supplements(root, root_pours, &plan)?;
        if !supplements.is_empty() {
            debug!(
                "Adding bottle dependencies for {}: {:?}",
                root.name(),
                supplements.iter().map(|d| &d.name).collect::<Vec<_>>()
            );
            let initial = merge_repeats(supplements.into_iter().chain(root.dependencies.clone()));
            (plan, reached) = self.expand(root, root_options, root_pours, &initial)?;
        }

        let mut closure = vec![ClosureNode {
            formula: Arc::clone(root),
            options: root_options.clone(),
            pours: root_pours,
            installed: false,
            build_only: false,
            is_root: true,
        }];
        let mut source_builds = Vec::new();
        for (name, seen) in reached {
            if name == root.name() {
                continue;
            }
            let node = match plan.get(&name) {
                Some(entry) => {
                    let pours = self.dependency_pours(&entry.formula, &entry.options);
                    if !pours {
                        source_builds.push(name.clone());
                    }
                    ClosureNode {
                        formula: Arc::clone(&entry.formula),
                        options: entry.options.clone(),
                        pours,
                        installed: false,
                        build_only: seen.build_only,
                        is_root: false,
                    }
                }
                None => ClosureNode {
                    formula: seen.formula,
                    options: seen.options,
                    pours: false,
                    installed: true,
                    build_only: seen.build_only,
                    is_root: false,
                },
            };
            closure.push(node);
        }

        debug!(
            "Plan for {}: {:?} (source builds: {:?})",
            root.name(),
            plan.names(),
            source_builds
        );
        Ok(ResolvedPlan {
            plan,
            closure,
            source_builds,
        })
    }

    fn expand(
        &self,
        root: &Arc<Formula>,
        root_options: &BuildOptions,
        root_pours: bool,
        initial: &[Dependency],
    ) -> Result<(InstallPlan, BTreeMap<String, Reached>)> {
        let mut reached: BTreeMap<String, Reached> = BTreeMap::new();
        let plan = DependencyExpander::new(self.formulary).expand(
            root,
            root_options,
            initial,
            |dependent, options, dep| {
                self.visit_edge(root, root_pours, dependent, options, dep, &mut reached)
            },
        )?;
        Ok((plan, reached))
    }

    fn visit_edge(
        &self,
        root: &Formula,
        root_pours: bool,
        dependent: &Formula,
        dependent_options: &BuildOptions,
        dep: &Dependency,
        reached: &mut BTreeMap<String, Reached>,
    ) -> Result<EdgeAction> {
        if dep.is_optional() && !dependent_options.with(&dep.name) {
            return Ok(EdgeAction::Prune);
        }
        if dep.is_recommended() && dependent_options.without(&dep.name) {
            return Ok(EdgeAction::Prune);
        }

        if dep.is_build_or_test_only() {
            let is_root = dependent.name() == root.name();
            let keep_test = dep.is_test() && self.include_test && is_root;
            let keep_build = dep.is_build() && {
                let dependent_pours = if is_root {
                    root_pours
                } else {
                    self.dependency_pours(dependent, dependent_options)
                };
                !dependent_pours
                    && (is_root
                        || !self.installed_current(
                            dependent,
                            &dependent_options.intersect_declared(&dependent.declared_options()),
                        )?)
            };
            if !keep_test && !keep_build {
                return Ok(EdgeAction::Prune);
            }
        }

        let child = self.formulary.resolve(&dep.name)?;
        let wanted = dep.options.intersect_declared(&child.declared_options());
        let seen = reached.entry(dep.name.clone()).or_insert_with(|| Reached {
            formula: Arc::clone(&child),
            options: BuildOptions::new(),
            build_only: true,
        });
        seen.build_only &= dep.is_build_or_test_only();
        seen.options.merge(&wanted);

        if self.installed_current(&child, &wanted)? {
            return Ok(EdgeAction::Skip);
        }
        Ok(EdgeAction::Include(wanted))
    }

    /// Toolchain formulae added when something in this run is poured and the
    /// root itself can be bottled. Already-installed ones are left out.
    fn bottle_supplements(
        &self,
        root: &Formula,
        root_pours: bool,
        plan: &InstallPlan,
    ) -> Result<Vec<Dependency>> {
        if self.config.bottle_dependencies.is_empty()
            || self.config.bottle_dependencies.iter().any(|n| n == root.name())
        {
            return Ok(Vec::new());
        }
        let root_eligible = root.pour_bottle && root.has_bottle_for(&self.config.bottle_tag);
        let any_pour = root_pours
            || plan
                .iter()
                .any(|e| self.dependency_pours(&e.formula, &e.options));
        if !root_eligible || !any_pour {
            return Ok(Vec::new());
        }

        let mut supplements = Vec::new();
        for name in &self.config.bottle_dependencies {
            let formula = self.formulary.resolve(name)?;
            if !self.installed_current(&formula, &BuildOptions::new())? {
                supplements.push(Dependency::new_runtime(name.clone()));
            }
        }
        Ok(supplements)
    }
}

/// Planned formulae that are pinned and would therefore have to change.
pub fn pinned_violations(plan: &InstallPlan, kegs: &KegRegistry) -> Vec<String> {
    plan.iter()
        .map(|e| e.formula.name())
        .filter(|name| kegs.is_pinned(name))
        .map(|name| match kegs.pinned_version(name) {
            Some(v) => format!("{name} (pinned at {v})"),
            None => name.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pint_common::dependency::{DependencyTag, Requirement, RequirementKind};
    use pint_common::model::formula::CELLAR_ANY;

    use super::*;
    use crate::check::{evaluate_requirements, RequirementChecker};

    struct Unsatisfied;

    impl RequirementChecker for Unsatisfied {
        fn check_requirement(&self, _: &Requirement) -> bool {
            false
        }
        fn has_build_tools(&self) -> bool {
            true
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        config: Config,
        kegs: KegRegistry,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::with_prefix(root.path());
        config.bottle_tag = "arm64_macos".into();
        let kegs = KegRegistry::new(config.clone());
        Fixture {
            _root: root,
            config,
            kegs,
        }
    }

    fn install_keg(config: &Config, name: &str, version: &str, options: &[&str]) {
        let keg = config.formula_keg_path(name, version);
        std::fs::create_dir_all(&keg).unwrap();
        let mut tab = Tab::new(None, None);
        tab.used_options = options.iter().collect();
        tab.write(&keg).unwrap();
    }

    fn bottled(name: &str) -> Formula {
        Formula::new(name, "1.0").with_bottle("arm64_macos", CELLAR_ANY)
    }

    fn planner<'a>(
        fx: &'a Fixture,
        formulary: &'a Formulary,
        sources: &'a BTreeSet<String>,
        include_test: bool,
    ) -> Planner<'a> {
        Planner {
            config: &fx.config,
            formulary,
            kegs: &fx.kegs,
            include_test,
            build_from_source: sources,
        }
    }

    fn app() -> Formula {
        bottled("app")
            .depends_on(Dependency::new_runtime("lib"))
            .depends_on(Dependency::new_with_tags("cmake", DependencyTag::BUILD))
            .depends_on(Dependency::new_with_tags("checker", DependencyTag::TEST))
            .depends_on(Dependency::new_with_tags("extra", DependencyTag::OPTIONAL))
            .depends_on(Dependency::new_with_tags("docs", DependencyTag::RECOMMENDED))
    }

    fn formulary() -> Formulary {
        Formulary::from_formulae([
            app(),
            bottled("lib"),
            Formula::new("cmake", "3.29"),
            Formula::new("checker", "1.0"),
            bottled("extra"),
            bottled("docs"),
        ])
    }

    #[test]
    fn pouring_root_prunes_build_and_test_edges() {
        let fx = fixture();
        let formulary = formulary();
        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let resolved = planner(&fx, &formulary, &sources, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        assert_eq!(resolved.plan.names(), vec!["docs", "lib"]);
        assert!(resolved.source_builds.is_empty());
    }

    #[test]
    fn dependency_build_requirement_counts_only_when_it_builds() {
        let fx = fixture();
        let formulary = Formulary::from_formulae([
            bottled("app").depends_on(Dependency::new_runtime("lib")),
            bottled("lib").requires(
                Requirement::new(RequirementKind::Executable("autoconf".into()))
                    .with_tags(DependencyTag::BUILD),
            ),
        ]);
        let root = formulary.resolve("app").unwrap();

        let pours = BTreeSet::new();
        let resolved = planner(&fx, &formulary, &pours, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        assert!(resolved.source_builds.is_empty());
        assert!(evaluate_requirements(&resolved.closure, false, &Unsatisfied).fatal.is_empty());

        let builds: BTreeSet<String> = ["lib".to_string()].into_iter().collect();
        let resolved = planner(&fx, &formulary, &builds, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        assert_eq!(resolved.source_builds, vec!["lib"]);
        let fatal = evaluate_requirements(&resolved.closure, false, &Unsatisfied).fatal;
        assert_eq!(fatal.len(), 1);
        assert_eq!(fatal[0].dependent, "lib");
    }

    #[test]
    fn source_build_and_options_change_the_plan() {
        let fx = fixture();
        let formulary = formulary();
        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let options: BuildOptions = ["with-extra", "without-docs"].into_iter().collect();
        let resolved = planner(&fx, &formulary, &sources, true)
            .plan(&root, &options, false)
            .unwrap();
        assert_eq!(resolved.plan.names(), vec!["checker", "cmake", "extra", "lib"]);
        assert_eq!(resolved.source_builds, vec!["checker", "cmake"]);
    }

    #[test]
    fn installed_dependency_is_skipped_and_its_build_deps_pruned() {
        let fx = fixture();
        let formulary = Formulary::from_formulae([
            bottled("app").depends_on(Dependency::new_runtime("lib")),
            Formula::new("lib", "1.0")
                .depends_on(Dependency::new_with_tags("cmake", DependencyTag::BUILD))
                .depends_on(Dependency::new_runtime("zlib")),
            Formula::new("cmake", "3.29"),
            bottled("zlib"),
        ]);
        install_keg(&fx.config, "lib", "1.0", &[]);
        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let resolved = planner(&fx, &formulary, &sources, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        assert_eq!(resolved.plan.names(), vec!["zlib"]);
        let lib = resolved
            .closure
            .iter()
            .find(|n| n.formula.name() == "lib")
            .unwrap();
        assert!(lib.installed);
    }

    #[test]
    fn keg_built_without_requested_option_does_not_satisfy() {
        let fx = fixture();
        let formulary = Formulary::from_formulae([
            bottled("app").depends_on(
                Dependency::new_runtime("lib").with_options(["with-ssl"].into_iter().collect()),
            ),
            Formula {
                options: vec!["with-ssl".into()],
                ..bottled("lib")
            },
        ]);
        install_keg(&fx.config, "lib", "1.0", &[]);
        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let resolved = planner(&fx, &formulary, &sources, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        let entry = resolved.plan.get("lib").unwrap();
        assert!(entry.options.contains("with-ssl"));
        assert_eq!(resolved.source_builds, vec!["lib"]);
    }

    #[test]
    fn bottle_supplements_only_when_something_pours() {
        let mut fx = fixture();
        fx.config.bottle_dependencies = vec!["patchelf".into()];
        let formulary = Formulary::from_formulae([
            bottled("app").depends_on(Dependency::new_runtime("lib")),
            bottled("lib"),
            bottled("patchelf"),
        ]);
        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let p = planner(&fx, &formulary, &sources, false);

        let poured = p.plan(&root, &BuildOptions::new(), true).unwrap();
        assert_eq!(poured.plan.names(), vec!["lib", "patchelf"]);

        let forced: BTreeSet<String> = ["lib".to_string()].into();
        let p = planner(&fx, &formulary, &forced, false);
        let built = p.plan(&root, &BuildOptions::new(), false).unwrap();
        assert_eq!(built.plan.names(), vec!["lib"]);

        install_keg(&fx.config, "patchelf", "1.0", &[]);
        let p = planner(&fx, &formulary, &sources, false);
        let satisfied = p.plan(&root, &BuildOptions::new(), true).unwrap();
        assert_eq!(satisfied.plan.names(), vec!["lib"]);
    }

    #[test]
    fn pinned_planned_dependencies_are_reported() {
        let fx = fixture();
        let formulary = Formulary::from_formulae([
            bottled("app").depends_on(Dependency::new_runtime("lib")),
            Formula::new("lib", "2.0"),
        ]);
        install_keg(&fx.config, "lib", "1.0", &[]);
        let old = fx.kegs.get_installed_keg("lib").unwrap().unwrap();
        fx.kegs.pin(&old).unwrap();

        let sources = BTreeSet::new();
        let root = formulary.resolve("app").unwrap();
        let resolved = planner(&fx, &formulary, &sources, false)
            .plan(&root, &BuildOptions::new(), true)
            .unwrap();
        assert_eq!(
            pinned_violations(&resolved.plan, &fx.kegs),
            vec!["lib (pinned at 1.0)"]
        );
    }
}
