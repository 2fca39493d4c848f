// pint-common/src/model/formula.rs
// Formula descriptors: the read-only recipe for one installable package.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::dependency::{
    merge_repeats, Dependency, DependencyTag, Requirement, RequirementKind,
};
use crate::model::options::BuildOptions;

/// Cellar value meaning the bottle can be poured into any prefix.
pub const CELLAR_ANY: &str = ":any";
pub const CELLAR_ANY_SKIP_RELOCATION: &str = ":any_skip_relocation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BottleFileSpec {
    #[serde(default = "default_cellar")]
    pub cellar: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_cellar() -> String {
    CELLAR_ANY.to_string()
}

impl BottleFileSpec {
    /// Whether a bottle built for `self.cellar` may be poured into `local_cellar`.
    pub fn compatible_with_cellar(&self, local_cellar: &Path) -> bool {
        match self.cellar.as_str() {
            CELLAR_ANY | CELLAR_ANY_SKIP_RELOCATION => true,
            built_for => Path::new(built_for) == local_cellar,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BottleSpec {
    pub stable: Option<BottleStableSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BottleStableSpec {
    #[serde(default)]
    pub rebuild: u32,
    #[serde(default)]
    pub files: HashMap<String, BottleFileSpec>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Formula {
    pub name: String,
    pub version: String,
    pub revision: u32,
    pub desc: Option<String>,
    pub license: Option<String>,
    pub tap: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub requirements: Vec<Requirement>,
    /// Option names this formula declares (`with-foo`, `without-bar`).
    pub options: Vec<String>,
    pub bottle: BottleSpec,
    /// `false` when the formula refuses to be poured from a bottle on this system.
    pub pour_bottle: bool,
    pub conflicts_with: Vec<String>,
    pub deprecated: bool,
    pub disabled: bool,
    pub disable_reason: Option<String>,
    pub keg_only: bool,
    /// Build script, absolute once loaded through the formulary.
    pub install: Option<PathBuf>,
    pub post_install: Option<PathBuf>,
    pub caveats: Option<String>,
    /// Descriptor file this formula was loaded from.
    pub source_path: Option<PathBuf>,
}

impl<'de> Deserialize<'de> for Formula {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawFormula {
            name: String,
            version: Value,
            #[serde(default)]
            revision: u32,
            desc: Option<String>,
            license: Option<String>,
            tap: Option<String>,
            #[serde(default, deserialize_with = "deserialize_dependencies")]
            dependencies: Vec<Dependency>,
            #[serde(default, deserialize_with = "deserialize_requirements")]
            requirements: Vec<Requirement>,
            #[serde(default)]
            options: Vec<String>,
            #[serde(default)]
            bottle: BottleSpec,
            #[serde(default = "default_true")]
            pour_bottle: bool,
            #[serde(default)]
            conflicts_with: Vec<String>,
            #[serde(default)]
            deprecated: bool,
            #[serde(default)]
            disabled: bool,
            disable_reason: Option<String>,
            #[serde(default)]
            keg_only: bool,
            install: Option<PathBuf>,
            post_install: Option<PathBuf>,
            caveats: Option<String>,
        }

        let raw = RawFormula::deserialize(deserializer)?;

        // `"1.2.3"` or `{"stable": "1.2.3"}`
        let version = match &raw.version {
            Value::String(s) => s.clone(),
            Value::Object(map) => match map.get("stable") {
                Some(Value::String(s)) => s.clone(),
                _ => return Err(de::Error::missing_field("version.stable")),
            },
            other => {
                return Err(de::Error::custom(format!(
                    "Invalid version for '{}': {other}",
                    raw.name
                )))
            }
        };
        if version.trim().is_empty() {
            return Err(de::Error::custom(format!("Empty version for '{}'", raw.name)));
        }

        Ok(Formula {
            name: raw.name,
            version,
            revision: raw.revision,
            desc: raw.desc,
            license: raw.license,
            tap: raw.tap,
            dependencies: merge_repeats(raw.dependencies),
            requirements: raw.requirements,
            options: raw
                .options
                .into_iter()
                .map(|o| o.trim_start_matches('-').to_string())
                .collect(),
            bottle: raw.bottle,
            pour_bottle: raw.pour_bottle,
            conflicts_with: raw.conflicts_with,
            deprecated: raw.deprecated,
            disabled: raw.disabled,
            disable_reason: raw.disable_reason,
            keg_only: raw.keg_only,
            install: raw.install,
            post_install: raw.post_install,
            caveats: raw.caveats,
            source_path: None,
        })
    }
}

fn default_true() -> bool {
    true
}

fn deserialize_dependencies<'de, D>(deserializer: D) -> std::result::Result<Vec<Dependency>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDependency {
        Name(String),
        Detailed {
            name: String,
            #[serde(default)]
            tags: Vec<String>,
            #[serde(default)]
            options: Vec<String>,
        },
    }

    let raw: Vec<RawDependency> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|d| match d {
            RawDependency::Name(name) => Dependency::new_runtime(name),
            RawDependency::Detailed {
                name,
                tags,
                options,
            } => Dependency::new_with_tags(name, DependencyTag::from_names(&tags))
                .with_options(options.into_iter().collect::<BuildOptions>()),
        })
        .collect())
}

fn deserialize_requirements<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<Requirement>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct RawRequirement {
        name: String,
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default = "default_true")]
        fatal: bool,
        #[serde(default)]
        message: Option<String>,
    }

    let raw: Vec<RawRequirement> = Vec::deserialize(deserializer)?;
    raw.into_iter()
        .map(|r| {
            let kind = match r.name.as_str() {
                "macos" => RequirementKind::MacOS(r.version.clone().ok_or_else(|| {
                    de::Error::custom("macos requirement needs a version")
                })?),
                "xcode" => RequirementKind::Xcode(r.version.clone()),
                "arch" => RequirementKind::Arch(
                    r.value
                        .clone()
                        .ok_or_else(|| de::Error::custom("arch requirement needs a value"))?,
                ),
                "executable" => RequirementKind::Executable(r.value.clone().ok_or_else(|| {
                    de::Error::custom("executable requirement needs a value")
                })?),
                other => RequirementKind::Other(other.to_string()),
            };
            Ok(Requirement {
                kind,
                tags: DependencyTag::from_names(&r.tags),
                fatal: r.fatal,
                message: r.message,
            })
        })
        .collect()
}

impl Formula {
    /// Minimal formula with no dependencies, bottles or scripts.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            revision: 0,
            desc: None,
            license: None,
            tap: None,
            dependencies: Vec::new(),
            requirements: Vec::new(),
            options: Vec::new(),
            bottle: BottleSpec::default(),
            pour_bottle: true,
            conflicts_with: Vec::new(),
            deprecated: false,
            disabled: false,
            disable_reason: None,
            keg_only: false,
            install: None,
            post_install: None,
            caveats: None,
            source_path: None,
        }
    }

    pub fn depends_on(mut self, dep: Dependency) -> Self {
        self.dependencies = merge_repeats(self.dependencies.into_iter().chain([dep]));
        self
    }

    pub fn requires(mut self, req: Requirement) -> Self {
        self.requirements.push(req);
        self
    }

    /// Declares a bottle for `tag` built for `cellar`.
    pub fn with_bottle(mut self, tag: &str, cellar: &str) -> Self {
        self.bottle
            .stable
            .get_or_insert_with(BottleStableSpec::default)
            .files
            .insert(
                tag.to_string(),
                BottleFileSpec {
                    cellar: cellar.to_string(),
                    url: None,
                    sha256: None,
                },
            );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version plus revision suffix, e.g. `1.2.3_1`.
    pub fn version_str_full(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.version, self.revision)
        } else {
            self.version.clone()
        }
    }

    pub fn full_name(&self) -> String {
        match &self.tap {
            Some(tap) => format!("{tap}/{}", self.name),
            None => self.name.clone(),
        }
    }

    pub fn install_prefix(&self, cellar_path: &Path) -> PathBuf {
        cellar_path.join(&self.name).join(self.version_str_full())
    }

    /// Bottle file for `tag`, falling back to an `all` bottle.
    pub fn bottle_for_tag(&self, tag: &str) -> Option<&BottleFileSpec> {
        let stable = self.bottle.stable.as_ref()?;
        stable.files.get(tag).or_else(|| stable.files.get("all"))
    }

    pub fn has_bottle_for(&self, tag: &str) -> bool {
        self.bottle_for_tag(tag).is_some()
    }

    /// Explicit options plus the implicit `with-<dep>` of every optional
    /// dependency and `without-<dep>` of every recommended one.
    pub fn declared_options(&self) -> Vec<String> {
        let mut declared = self.options.clone();
        for dep in &self.dependencies {
            if dep.is_optional() {
                declared.push(format!("with-{}", dep.name));
            }
            if dep.is_recommended() {
                declared.push(format!("without-{}", dep.name));
            }
        }
        declared.sort();
        declared.dedup();
        declared
    }

    pub fn declares_option(&self, option: &str) -> bool {
        let option = option.trim_start_matches('-');
        self.declared_options().iter().any(|o| o == option)
    }
}
