// pint-common/src/dependency/requirement.rs
use std::fmt;

use serde::{Deserialize, Serialize};

use super::definition::DependencyTag;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequirementKind {
    /// Minimum macOS version.
    MacOS(String),
    /// Xcode, optionally with a minimum version.
    Xcode(Option<String>),
    /// CPU architecture the formula supports.
    Arch(String),
    /// An executable that must be on PATH.
    Executable(String),
    /// Opaque requirement that can only be checked by a custom checker.
    Other(String),
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MacOS(v) => write!(f, "macOS >= {v}"),
            Self::Xcode(Some(v)) => write!(f, "Xcode >= {v}"),
            Self::Xcode(None) => write!(f, "Xcode"),
            Self::Arch(a) => write!(f, "{a} architecture"),
            Self::Executable(e) => write!(f, "{e} executable"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// A prerequisite that is checked but never installed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Requirement {
    pub kind: RequirementKind,
    #[serde(default)]
    pub tags: DependencyTag,
    #[serde(default = "default_fatal")]
    pub fatal: bool,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_fatal() -> bool {
    true
}

impl Requirement {
    pub fn new(kind: RequirementKind) -> Self {
        Self {
            kind,
            tags: DependencyTag::RUNTIME,
            fatal: true,
            message: None,
        }
    }

    pub fn with_tags(mut self, tags: DependencyTag) -> Self {
        self.tags = tags;
        self
    }

    pub fn advisory(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn is_build(&self) -> bool {
        self.tags.contains(DependencyTag::BUILD)
    }

    pub fn is_test(&self) -> bool {
        self.tags.contains(DependencyTag::TEST)
    }

    /// Human-readable explanation, falling back to a generic one per kind.
    pub fn message(&self) -> String {
        if let Some(m) = &self.message {
            return m.clone();
        }
        match &self.kind {
            RequirementKind::MacOS(v) => format!("macOS {v} or newer is required."),
            RequirementKind::Xcode(Some(v)) => {
                format!("Xcode {v} or newer is required to compile this software.")
            }
            RequirementKind::Xcode(None) => {
                "A full installation of Xcode is required to compile this software.".to_string()
            }
            RequirementKind::Arch(a) => format!("The {a} architecture is required for this software."),
            RequirementKind::Executable(e) => {
                format!("'{e}' must be installed and available on PATH.")
            }
            RequirementKind::Other(s) => format!("{s} is required."),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}
