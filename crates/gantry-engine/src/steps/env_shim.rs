//! Shim substituted for a step whose outputs are already in the environment.

use std::collections::BTreeMap;

use async_trait::async_trait;

use gantry_api::{static_supplier, ParameterMap, StepLink};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Replaces a fully-qualified step: same `creates()` as the original, but
/// `run` is a no-op that republishes the environment-provided values. The
/// shim never contributes to the stable link set.
pub struct InputEnvironmentStep {
    name: String,
    values: BTreeMap<String, String>,
    links: Vec<StepLink>,
}

impl InputEnvironmentStep {
    pub fn new(name: impl Into<String>, values: BTreeMap<String, String>, links: Vec<StepLink>) -> Self {
        Self {
            name: name.into(),
            values,
            links,
        }
    }
}

#[async_trait]
impl Step for InputEnvironmentStep {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Environment inputs stand in for step {}", self.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        self.links.clone()
    }

    fn provides(&self) -> ParameterMap {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), static_supplier(value.clone())))
            .collect()
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(self.values.values().cloned().collect())
    }

    async fn run(&self, _ctx: &StepContext) -> EngineResult<()> {
        Ok(())
    }
}
