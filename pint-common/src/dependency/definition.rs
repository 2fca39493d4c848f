// pint-common/src/dependency/definition.rs
use std::fmt;
use std::hash::{Hash, Hasher};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::model::options::BuildOptions;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DependencyTag: u8 {
        const RUNTIME     = 0b00000001;
        const BUILD       = 0b00000010;
        const TEST        = 0b00000100;
        const OPTIONAL    = 0b00001000;
        const RECOMMENDED = 0b00010000;
    }
}

impl Default for DependencyTag {
    fn default() -> Self {
        Self::RUNTIME
    }
}

impl DependencyTag {
    /// Parses descriptor tag names (`build`, `test`, `optional`, `recommended`, `runtime`).
    /// Unknown names are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut tags = DependencyTag::empty();
        for name in names {
            match name.as_ref() {
                "runtime" => tags |= DependencyTag::RUNTIME,
                "build" => tags |= DependencyTag::BUILD,
                "test" => tags |= DependencyTag::TEST,
                "optional" => tags |= DependencyTag::OPTIONAL,
                "recommended" => tags |= DependencyTag::RECOMMENDED,
                _ => {}
            }
        }
        if tags.is_empty() {
            DependencyTag::RUNTIME
        } else {
            tags
        }
    }
}

impl fmt::Display for DependencyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An edge of the dependency graph.
///
/// Two edges are the same edge when name and tags match; the attached options
/// do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default)]
    pub tags: DependencyTag,
    #[serde(default)]
    pub options: BuildOptions,
}

impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.tags.hash(state);
    }
}

impl Dependency {
    pub fn new_runtime(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: DependencyTag::RUNTIME,
            options: BuildOptions::new(),
        }
    }

    pub fn new_with_tags(name: impl Into<String>, tags: DependencyTag) -> Self {
        Self {
            name: name.into(),
            tags,
            options: BuildOptions::new(),
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(DependencyTag::BUILD)
    }

    pub fn is_test(&self) -> bool {
        self.tags.contains(DependencyTag::TEST)
    }

    pub fn is_optional(&self) -> bool {
        self.tags.contains(DependencyTag::OPTIONAL)
    }

    pub fn is_recommended(&self) -> bool {
        self.tags.contains(DependencyTag::RECOMMENDED)
    }

    /// Needed only while building or testing, never by the installed keg.
    pub fn is_build_or_test_only(&self) -> bool {
        self.tags.intersects(DependencyTag::BUILD | DependencyTag::TEST)
            && !self.tags.contains(DependencyTag::RUNTIME)
    }
}

/// Collapses repeated edges to the same formula into one, unioning tags and
/// options. First-seen order is preserved.
pub fn merge_repeats(deps: impl IntoIterator<Item = Dependency>) -> Vec<Dependency> {
    let mut merged: Vec<Dependency> = Vec::new();
    for dep in deps {
        if let Some(existing) = merged.iter_mut().find(|d| d.name == dep.name) {
            existing.tags |= dep.tags;
            existing.options.merge(&dep.options);
        } else {
            merged.push(dep);
        }
    }
    merged
}

pub trait DependencyExt {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency>;
    fn runtime(&self) -> Vec<&Dependency>;
    fn build_time(&self) -> Vec<&Dependency>;
}

impl DependencyExt for Vec<Dependency> {
    fn filter_by_tags(&self, include: DependencyTag, exclude: DependencyTag) -> Vec<&Dependency> {
        self.iter()
            .filter(|dep| dep.tags.contains(include) && !dep.tags.intersects(exclude))
            .collect()
    }

    fn runtime(&self) -> Vec<&Dependency> {
        // Optional and recommended edges are runtime edges once they survive pruning.
        self.iter()
            .filter(|dep| !dep.is_build_or_test_only())
            .collect()
    }

    fn build_time(&self) -> Vec<&Dependency> {
        self.filter_by_tags(DependencyTag::BUILD, DependencyTag::empty())
    }
}
