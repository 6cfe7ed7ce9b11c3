//! Dependency DAG construction for resources and stacks.
//!
//! Resource edges come from explicit `depends_on` and from references inside
//! properties (`Ref`, `Fn::GetAtt`, `Fn::Sub` placeholders). Stack edges come
//! from declared stack dependencies. Topological order uses Kahn's algorithm
//! with deterministic (alphabetical) tie-breaking.

use super::intrinsic;
use super::stack::App;
use super::types::ResourceDecl;
use crate::error::{Error, Result};
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Edges `(dependency, dependent)` among the resources of one stack.
pub fn resource_edges(resources: &IndexMap<String, ResourceDecl>) -> Result<Vec<(String, String)>> {
    let mut edges = Vec::new();
    for (id, decl) in resources {
        let implicit = intrinsic::references(&serde_json::Value::Object(decl.properties.clone()));
        let explicit: BTreeSet<String> = decl.depends_on.iter().cloned().collect();
        for dep in explicit.union(&implicit) {
            if !resources.contains_key(dep) {
                return Err(Error::Other(format!(
                    "resource '{}' depends on unknown '{}'",
                    id, dep
                )));
            }
            edges.push((dep.clone(), id.clone()));
        }
    }
    Ok(edges)
}

/// Topological order of one stack's resources.
pub fn build_resource_order(resources: &IndexMap<String, ResourceDecl>) -> Result<Vec<String>> {
    let edges = resource_edges(resources)?;
    let ids: Vec<String> = resources.keys().cloned().collect();
    topological_order(&ids, &edges)
}

/// Stack order honoring every declared stack dependency.
pub fn build_stack_order(app: &App) -> Result<Vec<String>> {
    let ids: Vec<String> = app.stacks.keys().cloned().collect();
    let mut edges = Vec::new();
    for (name, stack) in &app.stacks {
        for dep in &stack.dependencies {
            if !app.stacks.contains_key(dep) {
                return Err(Error::Other(format!(
                    "stack '{}' depends on unknown '{}'",
                    name, dep
                )));
            }
            edges.push((dep.clone(), name.clone()));
        }
    }
    topological_order(&ids, &edges)
}

/// Kahn's algorithm with sorted tie-breaking for determinism.
pub fn topological_order(ids: &[String], edges: &[(String, String)]) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (from, to) in edges {
        if from == to {
            return Err(Error::Cycle(from.clone()));
        }
        let Some(degree) = in_degree.get_mut(to.as_str()) else {
            return Err(Error::unknown("node", to.clone()));
        };
        *degree += 1;
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
    }

    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != ids.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut cycle_members: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !ordered.contains(id))
            .collect();
        cycle_members.sort_unstable();
        return Err(Error::Cycle(cycle_members.join(", ")));
    }

    Ok(order)
}
