//! Release payload steps: import a resolved pull spec or assemble a payload
//! from the stable stream.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{
    release_image_env, stable_stream_name, static_supplier, JobSpec, ParameterMap,
    ReleaseTagConfiguration, StepLink, RELEASE_IMAGE_STREAM,
};
use gantry_cluster::{
    ClusterClient, Container, ImageStreamTag, ObjectMeta, ObjectReference, Pod, PodSpec,
    RestartPolicy, TagReference, TagReferencePolicy,
};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Tags an already-resolved release payload pull spec into
/// `release-images:<name>`.
///
/// Release steps stay in the graph even when their parameters are injected
/// from the environment, so they remain addressable as targets.
pub struct ImportReleaseStep {
    name: String,
    pull_spec: String,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl ImportReleaseStep {
    pub fn new(
        name: impl Into<String>,
        pull_spec: impl Into<String>,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            pull_spec: pull_spec.into(),
            client,
            job_spec,
        }
    }
}

#[async_trait]
impl Step for ImportReleaseStep {
    fn name(&self) -> String {
        format!("[release:{}]", self.name)
    }

    fn description(&self) -> String {
        format!("Import the release payload {} as {}", self.pull_spec, self.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::ReleasePayload(self.name.clone())]
    }

    fn provides(&self) -> ParameterMap {
        let mut params = ParameterMap::new();
        params.insert(
            release_image_env(&self.name),
            static_supplier(self.pull_spec.clone()),
        );
        params
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        Ok(vec![self.pull_spec.clone()])
    }

    fn exempt_from_input_substitution(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let tag = ImageStreamTag {
            meta: ObjectMeta::named(
                self.job_spec.namespace.clone(),
                format!("{RELEASE_IMAGE_STREAM}:{}", self.name),
            ),
            tag: Some(TagReference {
                name: self.name.clone(),
                from: Some(ObjectReference::docker_image(self.pull_spec.clone())),
                reference_policy: TagReferencePolicy::Local,
            }),
            ..ImageStreamTag::default()
        };
        self.client.upsert_image_stream_tag(&tag).await?;
        Ok(())
    }
}

/// Assembles a release payload from the tags of the stable stream by running
/// a one-shot assembly pod, then exposes the produced pull spec.
pub struct AssembleReleaseStep {
    name: String,
    config: ReleaseTagConfiguration,
    registry_host: String,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl AssembleReleaseStep {
    pub fn new(
        name: impl Into<String>,
        config: ReleaseTagConfiguration,
        registry_host: impl Into<String>,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            registry_host: registry_host.into(),
            client,
            job_spec,
        }
    }

    fn payload_pull_spec(&self) -> String {
        format!(
            "{}/{}/{RELEASE_IMAGE_STREAM}:{}",
            self.registry_host, self.job_spec.namespace, self.name
        )
    }
}

#[async_trait]
impl Step for AssembleReleaseStep {
    fn name(&self) -> String {
        format!("[release:{}]", self.name)
    }

    fn description(&self) -> String {
        format!("Create the release image {} containing all images built by this job", self.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::StableImages {
            stream: stable_stream_name(Some(&self.config.name_prefix)),
        }]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::ReleasePayload(self.name.clone())]
    }

    fn provides(&self) -> ParameterMap {
        let mut params = ParameterMap::new();
        params.insert(
            release_image_env(&self.name),
            static_supplier(self.payload_pull_spec()),
        );
        params
    }

    fn exempt_from_input_substitution(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let stream = stable_stream_name(Some(&self.config.name_prefix));
        let pod = Pod {
            meta: ObjectMeta::named(
                self.job_spec.namespace.clone(),
                format!("release-{}", self.name),
            ),
            spec: PodSpec {
                restart_policy: RestartPolicy::Never,
                containers: vec![Container {
                    name: "assemble".to_string(),
                    image: format!("{stream}:cli"),
                    command: vec!["/bin/sh".to_string(), "-c".to_string()],
                    args: vec![format!(
                        "oc adm release new --from-image-stream={stream} -n {} --to-image={}",
                        self.job_spec.namespace,
                        self.payload_pull_spec()
                    )],
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
        };
        self.client.run_pod(&pod).await?;
        Ok(())
    }
}
