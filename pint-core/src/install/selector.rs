// pint-core/src/install/selector.rs
// Bottle-or-source decision for one formula.

use std::path::Path;

use pint_common::error::{PintError, Result};
use pint_common::model::formula::Formula;
use pint_common::model::options::BuildOptions;
use tracing::debug;

/// Flags that influence the decision. For dependencies only
/// `build_from_source` is ever set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub force_bottle: bool,
    pub build_from_source: bool,
    pub build_bottle: bool,
    pub interactive: bool,
}

/// Where a bottle would be poured.
#[derive(Debug, Clone, Copy)]
pub struct BottleTarget<'a> {
    pub tag: &'a str,
    pub cellar: &'a Path,
}

/// Decides whether `formula` should be poured from a bottle.
///
/// Order matters: forcing flags are considered before availability, and any
/// custom option forces a source build since bottles are built without options.
pub fn wants_bottle(
    formula: &Formula,
    options: &BuildOptions,
    policy: &SelectionPolicy,
    target: &BottleTarget<'_>,
) -> bool {
    let decision = decide(formula, options, policy, target);
    debug!(
        "wants_bottle({}, options=[{}], {:?}) = {}",
        formula.name(),
        options,
        policy,
        decision
    );
    decision
}

fn decide(
    formula: &Formula,
    options: &BuildOptions,
    policy: &SelectionPolicy,
    target: &BottleTarget<'_>,
) -> bool {
    if policy.force_bottle {
        return true;
    }
    if policy.build_from_source || policy.build_bottle || policy.interactive {
        return false;
    }
    if !options.is_empty() {
        return false;
    }
    if !formula.pour_bottle {
        return false;
    }
    match formula.bottle_for_tag(target.tag) {
        Some(bottle) => bottle.compatible_with_cellar(target.cellar),
        None => false,
    }
}

/// Fails with every formula that must be built when no toolchain exists.
pub fn ensure_build_tools(needs_source_build: &[String], has_build_tools: bool) -> Result<()> {
    if needs_source_build.is_empty() || has_build_tools {
        return Ok(());
    }
    let mut names = needs_source_build.to_vec();
    names.sort();
    names.dedup();
    Err(PintError::BuildToolsError(names))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use pint_common::model::formula::CELLAR_ANY;

    const TAG: &str = "arm64_macos";

    fn cellar() -> PathBuf {
        PathBuf::from("/opt/pint/Cellar")
    }

    fn bottled() -> Formula {
        Formula::new("jq", "1.7.1").with_bottle(TAG, CELLAR_ANY)
    }

    fn decide_with(formula: &Formula, options: &BuildOptions, policy: SelectionPolicy) -> bool {
        let cellar = cellar();
        wants_bottle(formula, options, &policy, &BottleTarget { tag: TAG, cellar: &cellar })
    }

    #[test]
    fn bottle_available_and_no_flags_pours() {
        assert!(decide_with(&bottled(), &BuildOptions::new(), SelectionPolicy::default()));
    }

    #[test]
    fn custom_options_force_source_build() {
        let opts: BuildOptions = ["with-oniguruma"].into_iter().collect();
        assert!(!decide_with(&bottled(), &opts, SelectionPolicy::default()));
    }

    #[test]
    fn force_bottle_beats_build_from_source() {
        let policy = SelectionPolicy {
            force_bottle: true,
            build_from_source: true,
            ..Default::default()
        };
        assert!(decide_with(&bottled(), &BuildOptions::new(), policy));
        let opts: BuildOptions = ["with-x"].into_iter().collect();
        assert!(decide_with(&Formula::new("nobottle", "1"), &opts, policy));
    }

    #[test]
    fn source_flags_disable_pouring() {
        for policy in [
            SelectionPolicy { build_from_source: true, ..Default::default() },
            SelectionPolicy { build_bottle: true, ..Default::default() },
            SelectionPolicy { interactive: true, ..Default::default() },
        ] {
            assert!(!decide_with(&bottled(), &BuildOptions::new(), policy));
        }
    }

    #[test]
    fn missing_or_incompatible_bottle_builds() {
        assert!(!decide_with(&Formula::new("jq", "1"), &BuildOptions::new(), SelectionPolicy::default()));
        let elsewhere = Formula::new("jq", "1").with_bottle(TAG, "/usr/local/Cellar");
        assert!(!decide_with(&elsewhere, &BuildOptions::new(), SelectionPolicy::default()));
        let refuses = Formula { pour_bottle: false, ..bottled() };
        assert!(!decide_with(&refuses, &BuildOptions::new(), SelectionPolicy::default()));
        let other_platform = Formula::new("jq", "1").with_bottle("x86_64_linux", CELLAR_ANY);
        assert!(!decide_with(&other_platform, &BuildOptions::new(), SelectionPolicy::default()));
    }

    #[test]
    fn build_tools_error_lists_everything_at_once() {
        assert!(ensure_build_tools(&[], false).is_ok());
        assert!(ensure_build_tools(&["a".into()], true).is_ok());
        match ensure_build_tools(&["zlib".into(), "curl".into(), "zlib".into()], false) {
            Err(PintError::BuildToolsError(names)) => assert_eq!(names, vec!["curl", "zlib"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
