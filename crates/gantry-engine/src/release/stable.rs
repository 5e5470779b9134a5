//! Stable stream management: the empty stable stream and release imports.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{stable_stream_name, JobSpec, ReleaseTagConfiguration, StepLink};
use gantry_cluster::{
    ClusterClient, ImageStream, ImageStreamTag, ObjectKey, ObjectMeta, ObjectReference,
    TagReference, TagReferencePolicy,
};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Ensures an empty `stable` stream exists for output tagging when no
/// release-tag configuration provides one.
pub struct StableImagesTagStep {
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl StableImagesTagStep {
    pub fn new(client: Arc<dyn ClusterClient>, job_spec: Arc<JobSpec>) -> Self {
        Self { client, job_spec }
    }
}

#[async_trait]
impl Step for StableImagesTagStep {
    fn name(&self) -> String {
        "[release-inputs]".to_string()
    }

    fn description(&self) -> String {
        "Create the output image stream for built images".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::StableImages {
            stream: stable_stream_name(None),
        }]
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let stream = ImageStream {
            meta: ObjectMeta::named(self.job_spec.namespace.clone(), stable_stream_name(None)),
            ..ImageStream::default()
        };
        match self.client.create_image_stream(&stream).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Imports the component images of a configured release into the stable
/// stream, one tag per component.
pub struct ReleaseImagesTagStep {
    config: ReleaseTagConfiguration,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl ReleaseImagesTagStep {
    pub fn new(
        config: ReleaseTagConfiguration,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            client,
            job_spec,
        }
    }

    fn stream_name(&self) -> String {
        stable_stream_name(Some(&self.config.name_prefix))
    }
}

#[async_trait]
impl Step for ReleaseImagesTagStep {
    fn name(&self) -> String {
        "[release-inputs]".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Find all of the input images from {}/{} and tag them into the output stream",
            self.config.namespace, self.config.name
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::StableImages {
            stream: self.stream_name(),
        }]
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(vec![format!(
            "{}/{}",
            self.config.namespace, self.config.name
        )])
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let source_key = ObjectKey::new(self.config.namespace.clone(), self.config.name.clone());
        let source = self.client.get_image_stream(&source_key).await?;

        let stream = ImageStream {
            meta: ObjectMeta::named(self.job_spec.namespace.clone(), self.stream_name()),
            ..ImageStream::default()
        };
        match self.client.create_image_stream(&stream).await {
            Ok(()) | Err(gantry_cluster::ClusterError::AlreadyExists { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        for tag_events in &source.status.tags {
            ctx.ensure_active()?;
            let Some(event) = tag_events.items.first() else {
                continue;
            };
            let tag = ImageStreamTag {
                meta: ObjectMeta::named(
                    self.job_spec.namespace.clone(),
                    format!("{}:{}", self.stream_name(), tag_events.tag),
                ),
                tag: Some(TagReference {
                    name: tag_events.tag.clone(),
                    from: Some(ObjectReference::docker_image(
                        event.docker_image_reference.clone(),
                    )),
                    reference_policy: TagReferencePolicy::Local,
                }),
                ..ImageStreamTag::default()
            };
            self.client.upsert_image_stream_tag(&tag).await?;
        }
        Ok(())
    }
}
