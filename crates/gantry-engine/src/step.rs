//! The step capability set.
//!
//! A step is the atomic unit of work: it names the links it requires and
//! creates, optionally exposes parameters, and runs against the cluster.
//! Steps must be safe to invoke from any task; cancellation is cooperative
//! through the context's token.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use gantry_api::{ParameterMap, StepLink};

use crate::error::EngineResult;

/// Shared execution context threaded through every step.
#[derive(Clone, Default)]
pub struct StepContext {
    /// Cancelled when the executor observes the first terminal error.
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail fast when the run has been cancelled.
    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(crate::error::EngineError::Interrupted);
        }
        Ok(())
    }
}

/// The polymorphic step contract.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable name; also the handle `--target` selects by.
    fn name(&self) -> String;

    /// One-line human description.
    fn description(&self) -> String;

    /// Links that must be produced before this step may run.
    fn requires(&self) -> Vec<StepLink>;

    /// Links this step produces on success.
    fn creates(&self) -> Vec<StepLink>;

    /// Parameters this step offers to consumers.
    fn provides(&self) -> ParameterMap {
        ParameterMap::new()
    }

    /// External inputs that determine this step's output, for change
    /// detection and caching decisions.
    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Static validation before scheduling.
    fn validate(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Whether the step must stay in the graph even when all its provided
    /// parameters are injected through the environment. Release steps set
    /// this so they remain target-addressable.
    fn exempt_from_input_substitution(&self) -> bool {
        false
    }

    /// Execute the step to completion.
    async fn run(&self, ctx: &StepContext) -> EngineResult<()>;
}
