//! Build an image from a directory of the project.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{
    pipeline_tag, JobSpec, ProjectImageBuildConfiguration, ResourceRequirements, StepLink,
};
use gantry_cluster::{BuildSource, ClusterClient};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Builds the dockerfile at `inputs` on top of the cloned source and pushes
/// the result to `pipeline:<to>`.
pub struct ProjectDirectoryImageBuildStep {
    config: ProjectImageBuildConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl ProjectDirectoryImageBuildStep {
    pub fn new(
        config: ProjectImageBuildConfiguration,
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
impl Step for ProjectDirectoryImageBuildStep {
    fn name(&self) -> String {
        self.config.to.clone()
    }

    fn description(&self) -> String {
        format!("Build image {} from the repository", self.config.to)
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(pipeline_tag::SOURCE.to_string())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(vec![format!(
            "{}:{}",
            self.config.inputs.context_dir, self.config.inputs.dockerfile_path
        )])
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.to.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "project image build has no output tag".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let build = super::pipeline_build(
            &self.job_spec,
            &self.config.to,
            Some(pipeline_tag::SOURCE),
            BuildSource::Dockerfile {
                dockerfile_path: self.config.inputs.dockerfile_path.clone(),
                context_dir: self.config.inputs.context_dir.clone(),
            },
            &self.config.to,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}
