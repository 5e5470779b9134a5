//! Parallel cooperative executor over the step graph.
//!
//! Any number of ready steps run concurrently on tokio tasks. A step is
//! ready once every step it depends on has completed. The first terminal
//! error cancels the shared token; in-flight steps drain, the first error is
//! returned and later ones are logged.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::graph::dependency_edges;
use crate::step::{Step, StepContext};

/// Validate and run `steps` to completion under `ctx`.
///
/// Ordering guarantee: no step begins before all its requirements are
/// published. Execution order among independent steps is unspecified.
pub async fn run_steps(steps: Vec<Arc<dyn Step>>, ctx: &StepContext) -> EngineResult<()> {
    for step in &steps {
        step.validate()
            .map_err(|err| EngineError::in_step(step.name(), err))?;
    }

    let edges = dependency_edges(&steps);
    let total = steps.len();
    let mut completed: HashSet<usize> = HashSet::new();
    let mut started: HashSet<usize> = HashSet::new();
    let mut in_flight = 0usize;
    let mut first_error: Option<EngineError> = None;

    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, EngineResult<()>)>();

    loop {
        // Schedule everything that became ready, unless the run is failing.
        if first_error.is_none() {
            for index in 0..total {
                if started.contains(&index) {
                    continue;
                }
                if !edges[index].iter().all(|dep| completed.contains(dep)) {
                    continue;
                }
                started.insert(index);
                in_flight += 1;
                let step = Arc::clone(&steps[index]);
                let ctx = ctx.clone();
                let tx = tx.clone();
                info!(step = %step.name(), "running step");
                tokio::spawn(async move {
                    let result = step.run(&ctx).await;
                    let _ = tx.send((index, result));
                });
            }
        }

        if in_flight == 0 {
            break;
        }

        let (index, result) = rx
            .recv()
            .await
            .expect("completion channel closed with steps in flight");
        in_flight -= 1;
        match result {
            Ok(()) => {
                debug!(step = %steps[index].name(), "step succeeded");
                completed.insert(index);
            }
            Err(err) => {
                let failure = EngineError::in_step(steps[index].name(), err);
                if first_error.is_none() {
                    error!(step = %steps[index].name(), error = %failure, "step failed, cancelling run");
                    ctx.cancel.cancel();
                    first_error = Some(failure);
                } else {
                    warn!(step = %steps[index].name(), error = %failure, "step failed after cancellation");
                }
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if completed.len() != total {
        let stuck: Vec<String> = (0..total)
            .filter(|i| !completed.contains(i))
            .map(|i| steps[i].name())
            .collect();
        return Err(EngineError::Unschedulable(stuck));
    }
    Ok(())
}
