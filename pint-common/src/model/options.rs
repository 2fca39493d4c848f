use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The set of option flags in effect for one formula's build.
///
/// Options are stored without leading dashes (`with-foo`, `without-bar`,
/// `HEAD`) and kept sorted so that equal sets always render identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildOptions(BTreeSet<String>);

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, option: impl AsRef<str>) -> bool {
        let flag = normalize(option.as_ref());
        if flag.is_empty() {
            return false;
        }
        self.0.insert(flag)
    }

    pub fn contains(&self, option: &str) -> bool {
        self.0.contains(&normalize(option))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `with-<name>` was requested.
    pub fn with(&self, name: &str) -> bool {
        self.0.contains(&format!("with-{name}"))
    }

    /// `without-<name>` was requested.
    pub fn without(&self, name: &str) -> bool {
        self.0.contains(&format!("without-{name}"))
    }

    pub fn union(&self, other: &BuildOptions) -> BuildOptions {
        BuildOptions(self.0.union(&other.0).cloned().collect())
    }

    /// Merge `other` in place, returning whether the set grew.
    pub fn merge(&mut self, other: &BuildOptions) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().cloned());
        self.0.len() != before
    }

    pub fn is_superset(&self, other: &BuildOptions) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Options of `self` that appear in `declared`.
    pub fn intersect_declared(&self, declared: &[String]) -> BuildOptions {
        declared
            .iter()
            .filter(|d| self.contains(d))
            .map(|d| normalize(d))
            .collect()
    }

    /// Command-line form, e.g. `["--with-foo", "--HEAD"]`.
    pub fn as_flags(&self) -> Vec<String> {
        self.0.iter().map(|o| format!("--{o}")).collect()
    }
}

fn normalize(option: &str) -> String {
    option.trim().trim_start_matches('-').to_string()
}

impl<S: AsRef<str>> FromIterator<S> for BuildOptions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut options = BuildOptions::new();
        for o in iter {
            options.insert(o);
        }
        options
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_flags().join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_normalized() {
        let opts: BuildOptions = ["--with-openssl", "without-x11", "  HEAD "].into_iter().collect();
        assert!(opts.with("openssl"));
        assert!(opts.without("x11"));
        assert!(opts.contains("--HEAD"));
        assert_eq!(opts.to_string(), "--HEAD --with-openssl --without-x11");
    }

    #[test]
    fn merge_reports_growth() {
        let mut a: BuildOptions = ["x"].into_iter().collect();
        let b: BuildOptions = ["y"].into_iter().collect();
        assert!(a.merge(&b));
        assert!(!a.merge(&b));
        assert_eq!(a, ["x", "y"].into_iter().collect());
    }
}
