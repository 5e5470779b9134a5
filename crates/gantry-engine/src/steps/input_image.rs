//! Import an external base image into the pipeline stream.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{InputImageTagStepConfiguration, JobSpec, ParameterMap, StepLink};
use gantry_cluster::{
    ClusterClient, ImageStreamTag, ObjectMeta, ObjectReference, TagReference, TagReferencePolicy,
};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Tags a referenced external image into `pipeline:<to>`. Idempotent.
pub struct InputImageTagStep {
    config: InputImageTagStepConfiguration,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl InputImageTagStep {
    pub fn new(
        config: InputImageTagStepConfiguration,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            client,
            job_spec,
        }
    }
}

#[async_trait]
impl Step for InputImageTagStep {
    fn name(&self) -> String {
        format!("[input:{}]", self.config.to)
    }

    fn description(&self) -> String {
        format!(
            "Find the input image {} and tag it into the pipeline",
            self.config.base_image
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    fn provides(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(vec![self.config.base_image.to_string()])
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let base = &self.config.base_image;
        let tag = ImageStreamTag {
            meta: ObjectMeta::named(
                self.job_spec.namespace.clone(),
                format!("pipeline:{}", self.config.to),
            ),
            tag: Some(TagReference {
                name: self.config.to.clone(),
                from: Some(ObjectReference::image_stream_tag(
                    base.namespace.clone(),
                    base.istag_name(),
                )),
                reference_policy: TagReferencePolicy::Local,
            }),
            ..ImageStreamTag::default()
        };
        self.client.upsert_image_stream_tag(&tag).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::ImageStreamTagReference;
    use gantry_cluster::fakes::FakeCluster;
    use gantry_cluster::ObjectKey;

    fn job_spec() -> Arc<JobSpec> {
        Arc::new(JobSpec {
            namespace: "ci-op-1234".to_string(),
            ..JobSpec::default()
        })
    }

    #[tokio::test]
    async fn tags_the_base_image_into_the_pipeline() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        let step = InputImageTagStep::new(
            InputImageTagStepConfiguration {
                base_image: ImageStreamTagReference {
                    namespace: "ocp".to_string(),
                    name: "builder".to_string(),
                    tag: "golang-1.15".to_string(),
                    alias: None,
                },
                to: "root".to_string(),
            },
            cluster.clone(),
            job_spec(),
        );

        assert_eq!(step.name(), "[input:root]");
        assert_eq!(
            step.creates(),
            vec![StepLink::PipelineImage("root".to_string())]
        );

        step.run(&StepContext::new()).await.unwrap();
        step.run(&StepContext::new()).await.unwrap(); // idempotent

        let tag = cluster
            .image_stream_tag(&ObjectKey::new("ci-op-1234", "pipeline:root"))
            .expect("tag created");
        let from = tag.tag.unwrap().from.unwrap();
        assert_eq!(from.kind, "ImageStreamTag");
        assert_eq!(from.namespace, "ocp");
        assert_eq!(from.name, "builder:golang-1.15");
    }
}
