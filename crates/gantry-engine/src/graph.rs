//! Dependency resolution over step links and target-driven pruning.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use gantry_api::StepLink;

use crate::error::{EngineError, EngineResult};
use crate::step::Step;

/// Compute, for each step, the indices of the steps it depends on.
///
/// An edge exists from producer `P` to consumer `C` iff any link in
/// `C.requires()` is satisfied by a link in `P.creates()`. A step that
/// requires [`StepLink::AllSteps`] depends on every step that produces at
/// least one link.
pub fn dependency_edges(steps: &[Arc<dyn Step>]) -> Vec<Vec<usize>> {
    let creates: Vec<Vec<StepLink>> = steps.iter().map(|s| s.creates()).collect();
    steps
        .iter()
        .enumerate()
        .map(|(consumer, step)| {
            let requires = step.requires();
            let wants_all = requires.iter().any(|l| matches!(l, StepLink::AllSteps));
            (0..steps.len())
                .filter(|&producer| {
                    if producer == consumer {
                        return false;
                    }
                    if wants_all {
                        return !creates[producer].is_empty();
                    }
                    gantry_api::links_intersect(&requires, &creates[producer])
                })
                .collect()
        })
        .collect()
}

/// Keep only the steps reachable from `targets` under the
/// `requires → creates` relation, preserving input order.
///
/// With no targets, every step is kept. An unknown target name is an error.
pub fn required_steps(
    steps: &[Arc<dyn Step>],
    targets: &[String],
) -> EngineResult<Vec<Arc<dyn Step>>> {
    if targets.is_empty() {
        return Ok(steps.to_vec());
    }

    let mut seeds = Vec::new();
    for target in targets {
        let index = steps
            .iter()
            .position(|s| &s.name() == target)
            .ok_or_else(|| EngineError::UnknownTarget(target.clone()))?;
        seeds.push(index);
    }

    let edges = dependency_edges(steps);
    let mut reachable: HashSet<usize> = HashSet::new();
    let mut queue: VecDeque<usize> = seeds.into_iter().collect();
    while let Some(index) = queue.pop_front() {
        if !reachable.insert(index) {
            continue;
        }
        for &dep in &edges[index] {
            queue.push_back(dep);
        }
    }

    Ok(steps
        .iter()
        .enumerate()
        .filter(|(i, _)| reachable.contains(i))
        .map(|(_, s)| Arc::clone(s))
        .collect())
}
