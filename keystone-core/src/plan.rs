//! Plan - Validated resource set with its creation order
//!
//! A Plan is built once per run. Resolving it performs every load-time check,
//! so no remote call happens for a resource set that cannot be applied.

use std::collections::BTreeMap;

use crate::error::EngineResult;
use crate::graph::DependencyGraph;
use crate::resource::ResourceSpec;

/// Resource set ordered for application
#[derive(Debug, Clone)]
pub struct Plan {
    resources: BTreeMap<String, ResourceSpec>,
    graph: DependencyGraph,
    batches: Vec<Vec<String>>,
}

impl Plan {
    /// Validate references, reject cycles and compute batches
    pub fn resolve(resources: Vec<ResourceSpec>) -> EngineResult<Self> {
        let graph = DependencyGraph::build(&resources)?;
        let batches = graph.batches()?;
        let resources = resources
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        Ok(Self {
            resources,
            graph,
            batches,
        })
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.get(name)
    }

    /// Resources in logical name order
    pub fn resources(&self) -> impl Iterator<Item = &ResourceSpec> {
        self.resources.values()
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Sets of mutually independent resources, in dependency order
    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    /// Creation order (the batches, flattened)
    pub fn order(&self) -> Vec<&str> {
        self.batches.iter().flatten().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Generate a summary of the Plan for display
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.resources.len(),
            batches: self.batches.len(),
            widest_batch: self.batches.iter().map(Vec::len).max().unwrap_or(0),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub batches: usize,
    pub widest_batch: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to create in {} batches",
            self.create, self.batches
        )
    }
}
