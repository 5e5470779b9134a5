//! Operator bundle source and index generation.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{
    pipeline_tag, BundleSourceStepConfiguration, IndexGeneratorStepConfiguration, JobSpec,
    ResourceRequirements, StepLink,
};
use gantry_cluster::{BuildSource, ClusterClient};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Rewrites operator manifests by applying pull-spec substitutions on top of
/// the cloned source, producing `pipeline:src-bundle`.
pub struct BundleSourceStep {
    config: BundleSourceStepConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl BundleSourceStep {
    pub fn new(
        config: BundleSourceStepConfiguration,
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
impl Step for BundleSourceStep {
    fn name(&self) -> String {
        pipeline_tag::BUNDLE_SOURCE.to_string()
    }

    fn description(&self) -> String {
        "Build an image with operator manifest substitutions applied".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(pipeline_tag::SOURCE.to_string())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(
            pipeline_tag::BUNDLE_SOURCE.to_string(),
        )]
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let commands = self
            .config
            .substitutions
            .iter()
            .map(|s| {
                format!(
                    r#"find manifests -type f -exec sed -i 's|{}|{}|g' {{}} +"#,
                    s.pullspec, s.with
                )
            })
            .collect::<Vec<_>>()
            .join("; ");
        let build = super::pipeline_build(
            &self.job_spec,
            pipeline_tag::BUNDLE_SOURCE,
            Some(pipeline_tag::SOURCE),
            BuildSource::Commands { commands },
            pipeline_tag::BUNDLE_SOURCE,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}

/// Generates the index dockerfile over the built bundle images, producing
/// `pipeline:ci-index-gen`.
pub struct IndexGeneratorStep {
    config: IndexGeneratorStepConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl IndexGeneratorStep {
    pub fn new(
        config: IndexGeneratorStepConfiguration,
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
impl Step for IndexGeneratorStep {
    fn name(&self) -> String {
        self.config.to.clone()
    }

    fn description(&self) -> String {
        "Generate an operator index dockerfile over the built bundles".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        self.config
            .operator_index
            .iter()
            .map(|bundle| StepLink::PipelineImage(bundle.clone()))
            .collect()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.operator_index.is_empty() {
            return Err(EngineError::InvalidConfiguration(
                "index generator configured without bundles".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let commands = format!(
            "opm index add --generate --bundles {} --out-dockerfile index.Dockerfile",
            self.config.operator_index.join(",")
        );
        let build = super::pipeline_build(
            &self.job_spec,
            &self.config.to,
            Some(pipeline_tag::SOURCE),
            BuildSource::Commands { commands },
            &self.config.to,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}
