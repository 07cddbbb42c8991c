//! Structural checks on a materialized stage set.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::error::PlanError;

use super::MaterializedStage;

/// Topologically order `stages` by their dependency edges.
///
/// Fails on duplicate ids, dependencies on ids outside the set, and cycles
/// (a self-dependency is a cycle of one).
pub fn order_stages(stages: &[MaterializedStage]) -> Result<Vec<&MaterializedStage>, PlanError> {
    let mut lookup: IndexMap<&str, &MaterializedStage> = IndexMap::new();
    for stage in stages {
        if lookup.insert(stage.id.as_str(), stage).is_some() {
            return Err(PlanError::DuplicateStage(stage.id.clone()));
        }
    }

    let mut in_degrees: HashMap<&str, usize> = lookup.keys().map(|stage_id| (*stage_id, 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for (stage_id, stage) in &lookup {
        let mut seen_dependencies = HashSet::new();
        for dependency in &stage.dependencies {
            if !lookup.contains_key(dependency.as_str()) {
                return Err(PlanError::DependencyGap {
                    stage: stage_id.to_string(),
                    dependency: dependency.clone(),
                });
            }
            if dependency == stage_id {
                return Err(PlanError::DependencyCycle {
                    stages: vec![stage_id.to_string()],
                });
            }
            if !seen_dependencies.insert(dependency.as_str()) {
                continue;
            }
            if let Some(degree) = in_degrees.get_mut(stage_id) {
                *degree += 1;
            }
            adjacency.entry(dependency.as_str()).or_default().push(*stage_id);
        }
    }

    let mut queue: VecDeque<&str> = lookup
        .keys()
        .filter(|stage_id| in_degrees.get(*stage_id).copied().unwrap_or(0) == 0)
        .copied()
        .collect();

    let mut ordered = Vec::with_capacity(lookup.len());
    while let Some(stage_id) = queue.pop_front() {
        ordered.push(lookup[stage_id]);
        for dependent in adjacency.get(stage_id).into_iter().flatten() {
            if let Some(degree) = in_degrees.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    if ordered.len() != lookup.len() {
        let mut remaining: Vec<String> = in_degrees
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(stage_id, _)| stage_id.to_string())
            .collect();
        remaining.sort();
        return Err(PlanError::DependencyCycle { stages: remaining });
    }

    Ok(ordered)
}
