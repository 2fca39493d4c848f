// pint-common/src/dependency/expander.rs
// Breadth-first expansion of a formula's dependency closure into an
// ordered, deduplicated install plan.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, error};

use crate::dependency::{merge_repeats, Dependency};
use crate::error::{PintError, Result};
use crate::formulary::Formulary;
use crate::model::formula::Formula;
use crate::model::options::BuildOptions;

/// What the per-edge visitor decided for one `(dependent, dependency)` edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeAction {
    /// The dependency joins the plan with these options.
    Include(BuildOptions),
    /// Already satisfied: not installed, but its own edges are still expanded.
    Skip,
    /// Dropped together with everything only reachable through it.
    Prune,
}

#[derive(Debug, Clone)]
pub struct PlanEntry {
    /// Merged edge: tags of every edge that reached this formula.
    pub dependency: Dependency,
    pub formula: Arc<Formula>,
    /// Union of the options of every including edge.
    pub options: BuildOptions,
}

/// Dependencies first, one entry per formula name.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    entries: Vec<PlanEntry>,
}

impl InstallPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.formula.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.formula.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for InstallPlan {
    type Item = PlanEntry;
    type IntoIter = std::vec::IntoIter<PlanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[derive(Debug)]
struct Node {
    formula: Arc<Formula>,
    dependency: Option<Dependency>,
    options: BuildOptions,
    included: bool,
}

pub struct DependencyExpander<'a> {
    formulary: &'a Formulary,
}

impl<'a> DependencyExpander<'a> {
    pub fn new(formulary: &'a Formulary) -> Self {
        Self { formulary }
    }

    /// Expands `root` starting from `initial` edges instead of its declared ones.
    ///
    /// `visit` is called with the dependent, the dependent's effective options
    /// and the edge. A node is revisited whenever a later edge grows its
    /// options, so edges that depend on those options are re-evaluated.
    pub fn expand<V>(
        &self,
        root: &Arc<Formula>,
        root_options: &BuildOptions,
        initial: &[Dependency],
        mut visit: V,
    ) -> Result<InstallPlan>
    where
        V: FnMut(&Formula, &BuildOptions, &Dependency) -> Result<EdgeAction>,
    {
        let root_name = root.name().to_string();
        debug!("Expanding dependencies of '{}' ({})", root_name, root_options);

        let mut nodes: BTreeMap<String, Node> = BTreeMap::new();
        let mut edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        nodes.insert(
            root_name.clone(),
            Node {
                formula: Arc::clone(root),
                dependency: None,
                options: root_options.clone(),
                included: false,
            },
        );
        queue.push_back(root_name.clone());

        while let Some(name) = queue.pop_front() {
            let (formula, options) = match nodes.get(&name) {
                Some(node) => (Arc::clone(&node.formula), node.options.clone()),
                None => continue,
            };
            let declared = if name == root_name {
                initial.to_vec()
            } else {
                formula.dependencies.clone()
            };

            for dep in merge_repeats(declared) {
                let action = visit(&formula, &options, &dep)?;
                debug!(
                    "EXPANDER: edge '{}' -> '{}' ({}) => {:?}",
                    name, dep.name, dep.tags, action
                );
                let include_options = match action {
                    EdgeAction::Prune => continue,
                    EdgeAction::Skip => None,
                    EdgeAction::Include(opts) => Some(opts),
                };

                edges.entry(name.clone()).or_default().insert(dep.name.clone());
                if dep.name == root_name {
                    // Reported as a cycle once traversal finishes.
                    continue;
                }

                if let Some(existing) = nodes.get_mut(&dep.name) {
                    // ── promotion: tags and options only ever grow ──────────────
                    let mut needs_revisit = false;
                    if let Some(merged) = existing.dependency.as_mut() {
                        merged.tags |= dep.tags;
                    }
                    if let Some(opts) = include_options {
                        if !existing.included {
                            existing.included = true;
                            needs_revisit = true;
                        }
                        if existing.options.merge(&opts) {
                            debug!(
                                "EXPANDER: options of '{}' grew to {}",
                                dep.name, existing.options
                            );
                            needs_revisit = true;
                        }
                    }
                    if needs_revisit {
                        queue.push_back(dep.name.clone());
                    }
                    continue;
                }

                let child = self.formulary.resolve(&dep.name)?;
                let included = include_options.is_some();
                nodes.insert(
                    dep.name.clone(),
                    Node {
                        formula: child,
                        dependency: Some(dep.clone()),
                        options: include_options.unwrap_or_default(),
                        included,
                    },
                );
                queue.push_back(dep.name.clone());
            }
        }

        if let Some(cycle) = find_cycle(&root_name, &edges) {
            error!("Dependency cycle detected: {}", cycle.join(" -> "));
            return Err(PintError::CircularDependency { cycle });
        }

        let order = topological_order(&nodes, &edges)?;
        let entries = order
            .into_iter()
            .filter(|n| *n != root_name)
            .filter_map(|n| nodes.remove(&n))
            .filter(|node| node.included)
            .filter_map(|node| {
                let mut dependency = node.dependency?;
                dependency.options = node.options.clone();
                Some(PlanEntry {
                    dependency,
                    formula: node.formula,
                    options: node.options,
                })
            })
            .collect::<Vec<_>>();

        debug!(
            "Install plan for '{}': {:?}",
            root_name,
            entries
                .iter()
                .map(|e| (e.formula.name(), e.options.to_string()))
                .collect::<Vec<_>>()
        );
        Ok(InstallPlan { entries })
    }
}

/// Depth-first search from `root`; returns the first cycle found as a path
/// that starts and ends with the same name.
fn find_cycle(root: &str, edges: &BTreeMap<String, BTreeSet<String>>) -> Option<Vec<String>> {
    fn dfs(
        name: &str,
        edges: &BTreeMap<String, BTreeSet<String>>,
        stack: &mut Vec<String>,
        done: &mut BTreeSet<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if done.contains(name) {
            return None;
        }
        stack.push(name.to_string());
        if let Some(children) = edges.get(name) {
            for child in children {
                if let Some(cycle) = dfs(child, edges, stack, done) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        done.insert(name.to_string());
        None
    }

    dfs(root, edges, &mut Vec::new(), &mut BTreeSet::new())
}

/// Kahn's algorithm over dependent -> dependency edges, emitting dependencies
/// first. Ties are broken by name so the order is deterministic.
fn topological_order(
    nodes: &BTreeMap<String, Node>,
    edges: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<String>> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in nodes.keys() {
        let deps = edges.get(name);
        let count = deps
            .map(|d| d.iter().filter(|c| nodes.contains_key(*c)).count())
            .unwrap_or(0);
        pending.insert(name.as_str(), count);
        if let Some(deps) = deps {
            for dep in deps.iter().filter(|c| nodes.contains_key(*c)) {
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut sorted = Vec::with_capacity(nodes.len());

    while let Some(name) = ready.pop_first() {
        sorted.push(name.to_string());
        for dependent in dependents.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if sorted.len() != nodes.len() {
        let stuck: Vec<String> = pending
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(n, _)| n.to_string())
            .collect();
        error!("Topological sort left unresolved nodes: {:?}", stuck);
        return Err(PintError::CircularDependency { cycle: stuck });
    }
    Ok(sorted)
}
