//! Clone the repository under test onto the build root.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{
    JobSpec, ProjectImageBuildInputs, ResourceRequirements, SourceStepConfiguration, StepLink,
};
use gantry_cluster::{BuildSource, ClusterClient};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Builds `pipeline:src` by cloning the job's refs onto the build root
/// using the configured cloner image.
pub struct SourceStep {
    config: SourceStepConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl SourceStep {
    pub fn new(
        config: SourceStepConfiguration,
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
impl Step for SourceStep {
    fn name(&self) -> String {
        self.config.to.clone()
    }

    fn description(&self) -> String {
        "Clone the correct source code into an image".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        let refs = self
            .job_spec
            .refs
            .as_ref()
            .or_else(|| self.job_spec.extra_refs.first())
            .ok_or_else(|| {
                EngineError::InvalidConfiguration("source step requires refs".to_string())
            })?;
        Ok(vec![format!(
            "{}/{}@{}",
            refs.org, refs.repo, refs.base_sha
        )])
    }

    fn validate(&self) -> EngineResult<()> {
        if self.job_spec.refs.is_none() && self.job_spec.extra_refs.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "source step configured without refs".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let cloner = &self.config.cloner_image;
        let commands = format!(
            "{} --src-root=/go && mv /go/src /src",
            self.config.cloner_path
        );
        let mut build = super::pipeline_build(
            &self.job_spec,
            &self.config.to,
            Some(&self.config.from),
            BuildSource::Commands { commands },
            &self.config.to,
            &self.resources,
        );
        build
            .meta
            .annotations
            .insert("cloner-image".to_string(), cloner.to_string());
        self.client.run_build(&build).await?;
        Ok(())
    }
}

/// Builds the build root itself from a dockerfile in the repository.
pub struct GitSourceStep {
    inputs: ProjectImageBuildInputs,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl GitSourceStep {
    pub fn new(
        inputs: ProjectImageBuildInputs,
        resources: ResourceRequirements,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            inputs,
            resources,
            client,
            job_spec,
        }
    }
}

#[async_trait]
impl Step for GitSourceStep {
    fn name(&self) -> String {
        gantry_api::pipeline_tag::ROOT.to_string()
    }

    fn description(&self) -> String {
        "Build the build root image from the repository".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(
            gantry_api::pipeline_tag::ROOT.to_string(),
        )]
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let build = super::pipeline_build(
            &self.job_spec,
            gantry_api::pipeline_tag::ROOT,
            None,
            BuildSource::Dockerfile {
                dockerfile_path: self.inputs.dockerfile_path.clone(),
                context_dir: self.inputs.context_dir.clone(),
            },
            gantry_api::pipeline_tag::ROOT,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}
