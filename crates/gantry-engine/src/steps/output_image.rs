//! Publish a pipeline tag into the stable output stream.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{JobSpec, OutputImageTagStepConfiguration, StepLink};
use gantry_cluster::{
    retry_on_conflict, Backoff, ClusterClient, ImageStream, ImageStreamTag, ObjectMeta,
    ObjectReference, TagReference, TagReferencePolicy,
};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Tags `pipeline:<from>` out to `<to.name>:<to.tag>` in the job namespace.
/// Idempotent; destination stream is created on first use.
pub struct OutputImageTagStep {
    config: OutputImageTagStepConfiguration,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl OutputImageTagStep {
    pub fn new(
        config: OutputImageTagStepConfiguration,
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
impl Step for OutputImageTagStep {
    fn name(&self) -> String {
        format!("[output:{}:{}]", self.config.to.name, self.config.to.tag)
    }

    fn description(&self) -> String {
        format!(
            "Tag the image {} into the image stream {}:{}",
            self.config.from, self.config.to.name, self.config.to.tag
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::StableImage {
            stream: self.config.to.name.clone(),
            tag: self.config.to.tag.clone(),
        }]
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let namespace = self.job_spec.namespace.clone();
        let stream_name = self.config.to.name.clone();

        retry_on_conflict(Backoff::promotion(), || async {
            let key = gantry_cluster::ObjectKey::new(namespace.clone(), stream_name.clone());
            match self.client.get_image_stream(&key).await {
                Ok(_) => {}
                Err(err) if err.is_not_found() => {
                    let stream = ImageStream {
                        meta: ObjectMeta::named(namespace.clone(), stream_name.clone()),
                        ..ImageStream::default()
                    };
                    match self.client.create_image_stream(&stream).await {
                        Ok(()) => {}
                        Err(err) if err.is_already_exists() => {}
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }

            let tag = ImageStreamTag {
                meta: ObjectMeta::named(
                    namespace.clone(),
                    format!("{}:{}", stream_name, self.config.to.tag),
                ),
                tag: Some(TagReference {
                    name: self.config.to.tag.clone(),
                    from: Some(ObjectReference::image_stream_tag(
                        namespace.clone(),
                        format!("pipeline:{}", self.config.from),
                    )),
                    reference_policy: TagReferencePolicy::Local,
                }),
                ..ImageStreamTag::default()
            };
            self.client.upsert_image_stream_tag(&tag).await
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::ImageStreamTagReference;
    use gantry_cluster::fakes::FakeCluster;
    use gantry_cluster::ObjectKey;

    #[tokio::test]
    async fn creates_the_stream_and_tag() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        let step = OutputImageTagStep::new(
            OutputImageTagStepConfiguration {
                from: "cli".to_string(),
                to: ImageStreamTagReference {
                    name: "stable".to_string(),
                    tag: "cli".to_string(),
                    ..ImageStreamTagReference::default()
                },
                optional: false,
            },
            cluster.clone(),
            Arc::new(JobSpec {
                namespace: "ci-op-1234".to_string(),
                ..JobSpec::default()
            }),
        );

        assert_eq!(step.name(), "[output:stable:cli]");
        step.run(&StepContext::new()).await.unwrap();

        assert!(cluster
            .image_stream(&ObjectKey::new("ci-op-1234", "stable"))
            .is_some());
        let tag = cluster
            .image_stream_tag(&ObjectKey::new("ci-op-1234", "stable:cli"))
            .expect("tag exists");
        assert_eq!(tag.tag.unwrap().from.unwrap().name, "pipeline:cli");
    }
}
