// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The DAG planner (spec §4.3): validates `after` references, detects
//! cycles, and produces a layered execution plan.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;

use crate::error::{OrchestratorError, Result};
use crate::workflow::StepDefinition;

/// A layered execution plan: layer `k` is the set of step ids with
/// dependency depth `k`, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayeredPlan {
    pub layers: Vec<Vec<String>>,
}

impl LayeredPlan {
    pub fn step_count(&self) -> usize {
        self.layers.iter().map(|l| l.len()).sum()
    }

    pub fn level_of(&self, step_id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.iter().any(|id| id == step_id))
    }
}

/// Builds a layered plan from a flat `steps` sequence (spec §4.3).
///
/// `petgraph` backs cycle detection (a `DiGraphMap` over step ids); level
/// assignment is computed with an explicit worklist rather than recursion so
/// deep graphs don't blow the call stack, per the spec's requirement.
pub fn build_plan(steps: &[StepDefinition]) -> Result<LayeredPlan> {
    let ids: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();

    // Rule 1: every `after` entry must name an existing step id.
    for step in steps {
        for dep in &step.after {
            if !ids.contains(dep.as_str()) {
                return Err(OrchestratorError::validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }

    // Build the dependency graph: an edge dep -> step for each `after` entry.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for step in steps {
        graph.add_node(step.id.as_str());
    }
    for step in steps {
        for dep in &step.after {
            graph.add_edge(dep.as_str(), step.id.as_str(), ());
        }
    }

    // Rule 2: acyclicity.
    if is_cyclic_directed(&graph) {
        return Err(OrchestratorError::validation(format!(
            "workflow '{}' contains a dependency cycle",
            steps.first().map(|s| s.id.as_str()).unwrap_or("<empty>")
        )));
    }

    // Rule 3: iterative level assignment via an explicit worklist (Kahn's
    // algorithm, tracking the max predecessor level instead of just arrival
    // order).
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        indegree.insert(step.id.as_str(), step.after.len());
        dependents.entry(step.id.as_str()).or_default();
    }
    for step in steps {
        for dep in &step.after {
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut level: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for step in steps {
        if step.after.is_empty() {
            level.insert(step.id.as_str(), 0);
            queue.push_back(step.id.as_str());
        }
    }

    while let Some(id) = queue.pop_front() {
        let current_level = level[id];
        if let Some(succs) = dependents.get(id) {
            for succ in succs {
                let candidate = current_level + 1;
                let entry = level.entry(succ).or_insert(0);
                if candidate > *entry {
                    *entry = candidate;
                }
                let remaining = indegree.get_mut(succ).expect("successor tracked");
                *remaining -= 1;
                if *remaining == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }

    if level.len() != steps.len() {
        // Should be unreachable: cycle detection above already rejected any
        // cyclic graph. Kept as a defensive check.
        return Err(OrchestratorError::validation(
            "failed to assign a dependency level to every step".to_string(),
        ));
    }

    let max_level = level.values().copied().max().unwrap_or(0);
    let mut layers: Vec<Vec<String>> = vec![Vec::new(); max_level + 1];
    // Rule 4: tie-breaking within a layer is source order, so we walk
    // `steps` (not the level map) when populating each layer.
    for step in steps {
        let lvl = level[step.id.as_str()];
        layers[lvl].push(step.id.clone());
    }

    Ok(LayeredPlan { layers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{StepKind, WaitConfig};

    fn step(id: &str, after: &[&str]) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            after: after.iter().map(|s| s.to_string()).collect(),
            condition: None,
            timeout: None,
            description: None,
            kind: StepKind::Wait(WaitConfig { duration_ms: 1 }),
        }
    }

    #[test]
    fn linear_chain_layers_in_order() {
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let plan = build_plan(&steps).unwrap();
        assert_eq!(
            plan.layers,
            vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn diamond_parallelizes_middle_layer() {
        let steps = vec![
            step("root", &[]),
            step("left", &["root"]),
            step("right", &["root"]),
            step("join", &["left", "right"]),
        ];
        let plan = build_plan(&steps).unwrap();
        assert_eq!(plan.layers[0], vec!["root".to_string()]);
        assert_eq!(plan.layers[1], vec!["left".to_string(), "right".to_string()]);
        assert_eq!(plan.layers[2], vec!["join".to_string()]);
    }

    #[test]
    fn rejects_cycle() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(build_plan(&steps).is_err());
    }

    #[test]
    fn rejects_unknown_predecessor() {
        let steps = vec![step("a", &["ghost"])];
        assert!(build_plan(&steps).is_err());
    }

    #[test]
    fn single_step_terminates_with_one_layer() {
        let steps = vec![step("only", &[])];
        let plan = build_plan(&steps).unwrap();
        assert_eq!(plan.layers.len(), 1);
        assert_eq!(plan.layers[0], vec!["only".to_string()]);
    }

    #[test]
    fn topological_validity_holds_for_every_edge() {
        let steps = vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
            step("e", &["d"]),
        ];
        let plan = build_plan(&steps).unwrap();
        for s in &steps {
            for dep in &s.after {
                assert!(plan.level_of(dep).unwrap() < plan.level_of(&s.id).unwrap());
            }
        }
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        let mut steps = Vec::new();
        let mut prev: Option<String> = None;
        for i in 0..5000 {
            let id = format!("s{i}");
            let after: Vec<&str> = prev.as_deref().into_iter().collect();
            steps.push(step(&id, &after));
            prev = Some(id);
        }
        let plan = build_plan(&steps).unwrap();
        assert_eq!(plan.layers.len(), 5000);
    }
}
