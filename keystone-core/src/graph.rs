//! Graph - Dependency analysis between logical resources
//!
//! Edges are derived once from the references each resource declares and never
//! change afterwards. Ties between unconstrained resources are always broken by
//! logical name so that the same input yields the same order.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{EngineResult, Error};
use crate::resource::{self, Dependency, ResourceSpec};

/// Dependency graph for a resource set
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Every logical name in the graph
    nodes: BTreeSet<String>,
    /// Resource name -> list of dependencies
    edges: BTreeMap<String, Vec<Dependency>>,
    /// Reverse edges: target -> resources that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph, failing on duplicate names or dangling references
    pub fn build(resources: &[ResourceSpec]) -> EngineResult<Self> {
        resource::validate(resources)?;

        let mut graph = Self::default();
        for resource in resources {
            graph.nodes.insert(resource.name.clone());
            for dependency in resource.dependencies() {
                graph.add_edge(resource.name.clone(), dependency);
            }
        }
        Ok(graph)
    }

    fn add_edge(&mut self, from: String, dependency: Dependency) {
        let target = dependency.target.clone();
        self.edges.entry(from.clone()).or_default().push(dependency);
        self.reverse_edges.entry(target).or_default().insert(from);
    }

    /// Get direct dependencies of a resource
    pub fn dependencies_of(&self, resource: &str) -> &[Dependency] {
        self.edges.get(resource).map_or(&[], |v| v.as_slice())
    }

    /// Distinct logical names a resource depends on
    pub fn targets_of(&self, resource: &str) -> BTreeSet<&str> {
        self.dependencies_of(resource)
            .iter()
            .map(|d| d.target.as_str())
            .collect()
    }

    /// Get resources that depend on this resource
    pub fn dependents_of(&self, resource: &str) -> Vec<&str> {
        self.reverse_edges
            .get(resource)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Group resources into dependency levels
    ///
    /// A resource lands in the first batch after all of its dependencies. Members
    /// of a batch never depend on each other, and each batch is sorted by name.
    pub fn batches(&self) -> EngineResult<Vec<Vec<String>>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(Error::CycleDetected(cycle));
        }

        let mut remaining: BTreeMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.as_str(), self.targets_of(n).len()))
            .collect();

        let mut batches = Vec::new();
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, pending)| **pending == 0)
                .map(|(name, _)| *name)
                .collect();

            // find_cycle guarantees progress
            if ready.is_empty() {
                let names = remaining.keys().map(|n| n.to_string()).collect();
                return Err(Error::CycleDetected(names));
            }

            for name in &ready {
                remaining.remove(name);
                for dependent in self.dependents_of(name) {
                    if let Some(pending) = remaining.get_mut(dependent) {
                        *pending -= 1;
                    }
                }
            }

            batches.push(ready.into_iter().map(str::to_string).collect());
        }

        Ok(batches)
    }

    /// Total creation order: the batches, flattened
    pub fn topological_order(&self) -> EngineResult<Vec<String>> {
        Ok(self.batches()?.into_iter().flatten().collect())
    }

    /// Check if the graph has any cycles
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Find a cycle, returned as the path from its first node back to itself
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut stack = Vec::new();

        for node in &self.nodes {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_util<'a>(
        &'a self,
        node: &'a str,
        visited: &mut BTreeSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = stack.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = stack[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node);
        stack.push(node);

        for target in self.targets_of(node) {
            if let Some(cycle) = self.find_cycle_util(target, visited, stack) {
                return Some(cycle);
            }
        }

        stack.pop();
        None
    }
}
