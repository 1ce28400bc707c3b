//! Dependency graph construction and ordering.
//!
//! Resources reference each other through `${resource.NAME.ATTR}` placeholders
//! embedded in attribute values. This module scans those references, builds a
//! directed acyclic graph, and produces the orders everything downstream
//! relies on: a topological apply order and its exact reverse for destroys.
//!
//! Cycles are a fatal configuration error detected up front; references are
//! never followed without this check.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::config::Resource;
use crate::error::{ConfigError, Result, StratoformError};

/// A single `${resource.NAME.ATTR}` reference found in an attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Name of the referenced resource.
    pub resource: String,
    /// Attribute of the referenced resource (e.g., "id").
    pub attribute: String,
}

/// Dependency graph over a set of resources.
///
/// Node identity is the resource name; edge `a -> b` means `a` depends on
/// `b` (some attribute of `a` references `b`). Construction fails on
/// unresolved references and cycles, so a constructed graph is always a DAG.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Resource names in input order.
    names: Vec<String>,
    /// Name -> input index.
    index: HashMap<String, usize>,
    /// Direct dependencies per node (indices).
    deps: Vec<BTreeSet<usize>>,
    /// Direct dependents per node (indices).
    dependents: Vec<BTreeSet<usize>>,
    /// Topological order (indices), ties broken by input order.
    order: Vec<usize>,
}

impl DependencyGraph {
    /// Builds the graph from a set of resources.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnresolvedReference` if an attribute references
    /// an undeclared resource, and `ConfigError::CircularDependency` (naming
    /// the cycle members) if the references do not form a DAG. A
    /// self-reference is reported as a one-member cycle.
    pub fn build(resources: &[Resource]) -> Result<Self> {
        let names: Vec<String> = resources.iter().map(|r| r.name.clone()).collect();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); resources.len()];

        for (i, resource) in resources.iter().enumerate() {
            for value in resource.attributes.values() {
                for reference in scan_references(value) {
                    let Some(&target) = index.get(&reference.resource) else {
                        return Err(StratoformError::Config(ConfigError::UnresolvedReference {
                            resource: resource.name.clone(),
                            target: reference.resource,
                        }));
                    };

                    if target == i {
                        return Err(StratoformError::Config(ConfigError::CircularDependency {
                            cycle: format!("{0} -> {0}", resource.name),
                        }));
                    }

                    deps[i].insert(target);
                }
            }
        }

        let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); resources.len()];
        for (i, dep_set) in deps.iter().enumerate() {
            for &d in dep_set {
                dependents[d].insert(i);
            }
        }

        let order = topo_order(&names, &deps, &dependents)?;

        debug!(
            "Built dependency graph: {} resources, {} edges",
            names.len(),
            deps.iter().map(BTreeSet::len).sum::<usize>()
        );

        Ok(Self {
            names,
            index,
            deps,
            dependents,
            order,
        })
    }

    /// Returns resource names in apply order: every resource appears after
    /// all resources it depends on. Ties break by input order, so plans are
    /// deterministic and reproducible.
    #[must_use]
    pub fn apply_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Returns resource names in destroy order: the exact reverse of the
    /// apply order.
    #[must_use]
    pub fn destroy_order(&self) -> Vec<&str> {
        self.order
            .iter()
            .rev()
            .map(|&i| self.names[i].as_str())
            .collect()
    }

    /// Returns the direct dependencies of a resource.
    #[must_use]
    pub fn depends_on(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.deps[i].iter().map(|&d| self.names[d].as_str()).collect()
        })
    }

    /// Returns the direct dependents of a resource.
    #[must_use]
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.index.get(name).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&d| self.names[d].as_str())
                .collect()
        })
    }

    /// Returns every resource reachable through dependent edges from the
    /// given resource, in apply order. Used for subtree skipping when a
    /// resource fails, and for rewiring during replacements.
    #[must_use]
    pub fn transitive_dependents(&self, name: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(name) else {
            return Vec::new();
        };

        let mut reached: BTreeSet<usize> = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for &dep in &self.dependents[node] {
                if reached.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        self.order
            .iter()
            .filter(|i| reached.contains(i))
            .map(|&i| self.names[i].as_str())
            .collect()
    }

    /// Orders a subset of resources without re-deriving the whole graph.
    ///
    /// The result is the precomputed apply order filtered to the subset;
    /// edges among excluded resources are irrelevant to the relative order
    /// of the included ones, which makes incremental applies cheap.
    #[must_use]
    pub fn subgraph_order(&self, subset: &BTreeSet<String>) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.names[i].as_str())
            .filter(|n| subset.contains(*n))
            .collect()
    }

    /// Returns the number of resources in the graph.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the graph has no resources.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Kahn's algorithm with a sorted ready set: among resources whose
/// dependencies are all satisfied, the one declared first is emitted first.
fn topo_order(
    names: &[String],
    deps: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
) -> Result<Vec<usize>> {
    let mut remaining: Vec<usize> = deps.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = remaining
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(names.len());

    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(next);

        for &dep in &dependents[next] {
            remaining[dep] -= 1;
            if remaining[dep] == 0 {
                ready.insert(dep);
            }
        }
    }

    if order.len() == names.len() {
        return Ok(order);
    }

    // Some nodes were never emitted: walk dependency edges among them until
    // a node repeats, which names the cycle.
    let stuck: BTreeSet<usize> = (0..names.len()).filter(|i| remaining[*i] > 0).collect();
    let cycle = find_cycle(names, deps, &stuck);
    Err(StratoformError::Config(ConfigError::CircularDependency {
        cycle,
    }))
}

/// Finds one cycle among the stuck nodes and renders it as "a -> b -> a".
fn find_cycle(names: &[String], deps: &[BTreeSet<usize>], stuck: &BTreeSet<usize>) -> String {
    let Some(&start) = stuck.iter().next() else {
        return String::from("unknown");
    };

    let mut path = vec![start];
    let mut seen: HashMap<usize, usize> = HashMap::new();
    seen.insert(start, 0);

    let mut current = start;
    loop {
        // Follow any dependency edge that stays within the stuck set.
        let Some(&next) = deps[current].iter().find(|d| stuck.contains(d)) else {
            return names[current].clone();
        };

        if let Some(&pos) = seen.get(&next) {
            let members: Vec<&str> = path[pos..].iter().map(|&i| names[i].as_str()).collect();
            return format!("{} -> {}", members.join(" -> "), names[next]);
        }

        seen.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

/// Scans an attribute value for `${resource.NAME.ATTR}` placeholders.
#[must_use]
pub fn scan_references(value: &str) -> Vec<Reference> {
    const PREFIX: &str = "${resource.";

    let mut references = Vec::new();
    let mut rest = value;

    while let Some(start) = rest.find(PREFIX) {
        let after = &rest[start + PREFIX.len()..];
        let Some(end) = after.find('}') else {
            break;
        };

        let body = &after[..end];
        if let Some((name, attribute)) = body.split_once('.') {
            if !name.is_empty() && !attribute.is_empty() {
                references.push(Reference {
                    resource: name.to_string(),
                    attribute: attribute.to_string(),
                });
            }
        }

        rest = &after[end + 1..];
    }

    references
}
