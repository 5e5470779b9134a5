//! Layer build commands onto a pipeline image and cache the result.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{JobSpec, PipelineImageCacheStepConfiguration, ResourceRequirements, StepLink};
use gantry_cluster::{BuildSource, ClusterClient};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Runs `commands` in a container based on `pipeline:<from>` and pushes the
/// committed layer to `pipeline:<to>`.
pub struct PipelineImageCacheStep {
    config: PipelineImageCacheStepConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl PipelineImageCacheStep {
    pub fn new(
        config: PipelineImageCacheStepConfiguration,
        resources: ResourceRequirements,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            resources,
            client,
            job_spec,
        }
    }
}

#[async_trait]
impl Step for PipelineImageCacheStep {
    fn name(&self) -> String {
        self.config.to.clone()
    }

    fn description(&self) -> String {
        format!(
            "Store build results into the pipeline image {}",
            self.config.to
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(vec![self.config.commands.clone()])
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let build = super::pipeline_build(
            &self.job_spec,
            &self.config.to,
            Some(&self.config.from),
            BuildSource::Commands {
                commands: self.config.commands.clone(),
            },
            &self.config.to,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}
