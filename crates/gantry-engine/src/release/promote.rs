//! Terminal post-step that copies pipeline tags to the release destination.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use gantry_api::{
    JobSpec, ParameterMap, ProjectImageBuildConfiguration, PromotionConfiguration,
    ReleaseBuildConfiguration, ImageStreamTagReference, StepLink, PIPELINE_IMAGE_STREAM,
};
use gantry_cluster::{
    ensure_namespace, retry_on_conflict, Backoff, ClusterClient, Container, ImageStream,
    ImageStreamTag, Namespace, ObjectKey, ObjectMeta, ObjectReference, Pod, PodSpec,
    RestartPolicy, Secret, TagReference, TagReferencePolicy, Volume, VolumeMount, VolumeSource,
    DOCKER_CONFIG_JSON_KEY,
};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Name of the secret holding push credentials for the central registry.
pub const PUSH_SECRET_NAME: &str = "registry-push-credentials";

/// Mount path of the push secret inside the promotion pod.
pub const PUSH_SECRET_MOUNT_PATH: &str = "/etc/push-secret";

/// Render the destination shape for logging.
fn target_name(config: &PromotionConfiguration) -> String {
    if !config.name.is_empty() {
        format!("{}/{}:${{component}}", config.namespace, config.name)
    } else {
        format!("{}/${{component}}:{}", config.namespace, config.tag)
    }
}

/// Compute the `{dst → src}` tag mapping and the set of destination names.
///
/// Every image that is required or not optional starts as `{to → to}`;
/// excluded images are subtracted, additional images are unioned, and the
/// name prefix rewrites every destination.
pub fn to_promote(
    config: &PromotionConfiguration,
    images: &[ProjectImageBuildConfiguration],
    required_images: &HashSet<String>,
) -> (BTreeMap<String, String>, BTreeSet<String>) {
    let mut tags_by_dst = BTreeMap::new();
    let mut names = BTreeSet::new();
    if config.disabled {
        return (tags_by_dst, names);
    }

    for image in images {
        if required_images.contains(&image.to) || !image.optional {
            tags_by_dst.insert(image.to.clone(), image.to.clone());
            names.insert(image.to.clone());
        }
    }
    for excluded in &config.excluded_images {
        tags_by_dst.remove(excluded);
        names.remove(excluded);
    }
    for (dst, src) in &config.additional_images {
        tags_by_dst.insert(dst.clone(), src.clone());
        names.insert(dst.clone());
    }

    if config.name_prefix.is_empty() {
        return (tags_by_dst, names);
    }

    let mut prefixed = BTreeMap::new();
    let mut prefixed_names = BTreeSet::new();
    for (dst, src) in tags_by_dst {
        let name = format!("{}{}", config.name_prefix, dst);
        prefixed_names.insert(name.clone());
        prefixed.insert(name, src);
    }
    (prefixed, prefixed_names)
}

/// The destination references a configuration will promote to.
pub fn promoted_tags(configuration: &ReleaseBuildConfiguration) -> Vec<ImageStreamTagReference> {
    let Some(promotion) = &configuration.promotion else {
        return Vec::new();
    };
    let (tags, _) = to_promote(promotion, &configuration.images, &HashSet::new());
    tags.keys()
        .map(|dst| {
            if !promotion.name.is_empty() {
                ImageStreamTagReference {
                    namespace: promotion.namespace.clone(),
                    name: promotion.name.clone(),
                    tag: dst.clone(),
                    alias: None,
                }
            } else {
                ImageStreamTagReference {
                    namespace: promotion.namespace.clone(),
                    name: dst.clone(),
                    tag: promotion.tag.clone(),
                    alias: None,
                }
            }
        })
        .collect()
}

/// Substitute the internal registry host with the public hostname taken from
/// the stream's public repository. References without an internal `:5000`
/// host pass through unchanged.
pub fn public_image_reference(docker_image_reference: &str, public_repository: &str) -> String {
    if !docker_image_reference.contains(":5000") {
        return docker_image_reference.to_string();
    }
    let Some(public_host) = public_repository.split('/').next().filter(|h| !h.is_empty()) else {
        warn!(repository = %public_repository, "failed to get hostname from public repository");
        return docker_image_reference.to_string();
    };
    match docker_image_reference.split_once('/') {
        Some((_, rest)) => format!("{public_host}/{rest}"),
        None => {
            warn!(reference = %docker_image_reference, "failed to get hostname from image reference");
            docker_image_reference.to_string()
        }
    }
}

/// Build the one-shot promotion pod that mirrors every mapping entry.
///
/// Commands are emitted in ascending lexicographic order of their source
/// pull spec, joined with ` && ` in a single shell invocation.
pub fn promotion_pod(
    image_mirror_target: &BTreeMap<String, String>,
    namespace: &str,
    registry_host: &str,
) -> Pod {
    let commands: Vec<String> = image_mirror_target
        .iter()
        .map(|(src, dst)| {
            format!(
                "oc image mirror --registry-config={PUSH_SECRET_MOUNT_PATH}/{DOCKER_CONFIG_JSON_KEY} {src} {dst}"
            )
        })
        .collect();

    Pod {
        meta: ObjectMeta::named(namespace, "promotion"),
        spec: PodSpec {
            restart_policy: RestartPolicy::Never,
            containers: vec![Container {
                name: "promotion".to_string(),
                image: format!("{registry_host}/ocp/4.6:cli"),
                command: vec!["/bin/sh".to_string(), "-c".to_string()],
                args: vec![commands.join(" && ")],
                volume_mounts: vec![VolumeMount {
                    name: "push-secret".to_string(),
                    mount_path: PUSH_SECRET_MOUNT_PATH.to_string(),
                    read_only: true,
                }],
                ..Container::default()
            }],
            volumes: vec![Volume {
                name: "push-secret".to_string(),
                source: VolumeSource::Secret {
                    secret_name: PUSH_SECRET_NAME.to_string(),
                },
            }],
            ..PodSpec::default()
        },
    }
}

/// Copies tags from the pipeline image stream to the destination defined in
/// the promotion config. Source tags missing from the pipeline status are
/// silently skipped.
pub struct PromotionStep {
    config: PromotionConfiguration,
    images: Vec<ProjectImageBuildConfiguration>,
    required_images: HashSet<String>,
    src_client: Arc<dyn ClusterClient>,
    dst_client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
    push_secret: Option<Secret>,
    image_creator_client: Option<Arc<dyn ClusterClient>>,
    registry_host: String,
}

impl PromotionStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PromotionConfiguration,
        images: Vec<ProjectImageBuildConfiguration>,
        required_images: HashSet<String>,
        src_client: Arc<dyn ClusterClient>,
        dst_client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
        push_secret: Option<Secret>,
        image_creator_client: Option<Arc<dyn ClusterClient>>,
        registry_host: impl Into<String>,
    ) -> Self {
        Self {
            config,
            images,
            required_images,
            src_client,
            dst_client,
            job_spec,
            push_secret,
            image_creator_client,
            registry_host: registry_host.into(),
        }
    }

    /// Build the `{public source pull spec → destination}` mirror mapping,
    /// ensuring each destination stream exists on the way. Ensure failures
    /// are logged but do not abort promotion.
    async fn image_mirror_target(
        &self,
        client: &dyn ClusterClient,
        tags: &BTreeMap<String, String>,
        pipeline: &ImageStream,
    ) -> BTreeMap<String, String> {
        let mut mirror = BTreeMap::new();
        for (dst, src) in tags {
            let Some(event) = pipeline.find_status_tag(src) else {
                continue;
            };
            let source = public_image_reference(
                &event.docker_image_reference,
                &pipeline.status.public_docker_image_repository,
            );
            let (stream_name, destination) = if !self.config.name.is_empty() {
                (
                    self.config.name.clone(),
                    format!(
                        "{}/{}/{}:{}",
                        self.registry_host, self.config.namespace, self.config.name, dst
                    ),
                )
            } else {
                (
                    dst.clone(),
                    format!(
                        "{}/{}/{}:{}",
                        self.registry_host, self.config.namespace, dst, self.config.tag
                    ),
                )
            };
            mirror.insert(source, destination);

            if let Err(err) = create_stream_if_absent(client, &self.config.namespace, &stream_name).await {
                warn!(
                    namespace = %self.config.namespace,
                    stream = %stream_name,
                    error = %err,
                    "failed to ensure destination imagestream"
                );
            }
        }
        mirror
    }

    async fn run_push_path(&self, pipeline: &ImageStream, tags: &BTreeMap<String, String>) -> EngineResult<()> {
        // The push-secret path writes through the image-creator cluster; a
        // missing client is a configuration bug, not a skippable state.
        let image_creator = self.image_creator_client.as_ref().ok_or_else(|| {
            EngineError::InvalidConfiguration(
                "promotion with a push secret requires an image-creator client".to_string(),
            )
        })?;

        ensure_namespace(
            image_creator.as_ref(),
            &Namespace {
                meta: ObjectMeta {
                    name: self.config.namespace.clone(),
                    ..ObjectMeta::default()
                },
            },
        )
        .await?;

        let mirror = self
            .image_mirror_target(image_creator.as_ref(), tags, pipeline)
            .await;
        if mirror.is_empty() {
            info!("nothing to promote, skipping");
            return Ok(());
        }

        let pod = promotion_pod(&mirror, &self.job_spec.namespace, &self.registry_host);
        self.src_client.run_pod(&pod).await?;
        Ok(())
    }

    async fn run_single_stream_path(
        &self,
        pipeline: &ImageStream,
        tags: &BTreeMap<String, String>,
    ) -> EngineResult<()> {
        let key = ObjectKey::new(self.config.namespace.clone(), self.config.name.clone());
        retry_on_conflict(Backoff::promotion(), || async {
            let mut stream = match self.dst_client.get_image_stream(&key).await {
                Ok(stream) => stream,
                Err(err) if err.is_not_found() => {
                    let stream = ImageStream {
                        meta: ObjectMeta::named(key.namespace.clone(), key.name.clone()),
                        ..ImageStream::default()
                    };
                    self.dst_client.create_image_stream(&stream).await?;
                    self.dst_client.get_image_stream(&key).await?
                }
                Err(err) => return Err(err),
            };

            for (dst, src) in tags {
                if let Some(event) = pipeline.find_status_tag(src) {
                    stream.spec.tags.push(TagReference {
                        name: dst.clone(),
                        from: Some(ObjectReference::docker_image(
                            event.docker_image_reference.clone(),
                        )),
                        reference_policy: TagReferencePolicy::Source,
                    });
                }
            }
            self.dst_client.update_image_stream(&stream).await
        })
        .await?;
        Ok(())
    }

    async fn run_per_stream_path(
        &self,
        pipeline: &ImageStream,
        tags: &BTreeMap<String, String>,
    ) -> EngineResult<()> {
        for (dst, src) in tags {
            let Some(event) = pipeline.find_status_tag(src) else {
                continue;
            };
            let reference = event.docker_image_reference.clone();
            retry_on_conflict(Backoff::promotion(), || {
                let reference = reference.clone();
                async move {
                    create_stream_if_absent(
                        self.dst_client.as_ref(),
                        &self.config.namespace,
                        dst,
                    )
                    .await?;
                    let tag = ImageStreamTag {
                        meta: ObjectMeta::named(
                            self.config.namespace.clone(),
                            format!("{dst}:{}", self.config.tag),
                        ),
                        tag: Some(TagReference {
                            name: self.config.tag.clone(),
                            from: Some(ObjectReference::docker_image(reference)),
                            reference_policy: TagReferencePolicy::Source,
                        }),
                        ..ImageStreamTag::default()
                    };
                    self.dst_client.upsert_image_stream_tag(&tag).await
                }
            })
            .await?;
        }
        Ok(())
    }

    async fn promote(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let (tags, names) = to_promote(&self.config, &self.images, &self.required_images);
        if names.is_empty() {
            info!("nothing to promote, skipping");
            return Ok(());
        }
        info!(
            target = %target_name(&self.config),
            tags = %names.iter().cloned().collect::<Vec<_>>().join(", "),
            "promoting tags"
        );

        let pipeline_key = ObjectKey::new(
            self.job_spec.namespace.clone(),
            PIPELINE_IMAGE_STREAM.to_string(),
        );
        let pipeline = self
            .src_client
            .get_image_stream(&pipeline_key)
            .await
            .map_err(|err| {
                EngineError::for_reason(
                    "promoting_images",
                    format!("could not resolve pipeline imagestream: {err}"),
                )
            })?;

        if self.push_secret.is_some() {
            return self.run_push_path(&pipeline, &tags).await;
        }
        if !self.config.name.is_empty() {
            return self.run_single_stream_path(&pipeline, &tags).await;
        }
        self.run_per_stream_path(&pipeline, &tags).await
    }
}

async fn create_stream_if_absent(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> gantry_cluster::ClusterResult<()> {
    let key = ObjectKey::new(namespace, name);
    match client.get_image_stream(&key).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => {
            let stream = ImageStream {
                meta: ObjectMeta::named(namespace, name),
                spec: gantry_cluster::ImageStreamSpec {
                    lookup_policy_local: true,
                    ..gantry_cluster::ImageStreamSpec::default()
                },
                ..ImageStream::default()
            };
            match client.create_image_stream(&stream).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_already_exists() => Ok(()),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

#[async_trait]
impl Step for PromotionStep {
    fn name(&self) -> String {
        "[promotion]".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Promote built images into the release image stream {}",
            target_name(&self.config)
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::AllSteps]
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn provides(&self) -> ParameterMap {
        ParameterMap::new()
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.disabled {
            return Err(EngineError::InvalidConfiguration(
                "promotion is disabled in the configuration".to_string(),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        self.promote(ctx).await.map_err(|err| match err {
            tagged @ EngineError::Reasoned { .. } => tagged,
            other => EngineError::for_reason("promoting_images", other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(to: &str, optional: bool) -> ProjectImageBuildConfiguration {
        ProjectImageBuildConfiguration {
            to: to.to_string(),
            optional,
            ..ProjectImageBuildConfiguration::default()
        }
    }

    fn names(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn disabled_config_promotes_nothing() {
        let config = PromotionConfiguration {
            disabled: true,
            ..PromotionConfiguration::default()
        };
        let images = vec![image("foo", false), image("bar", false)];
        let (tags, tag_names) = to_promote(&config, &images, &HashSet::new());
        assert!(tags.is_empty());
        assert!(tag_names.is_empty());
    }

    #[test]
    fn enabled_config_returns_the_input_list() {
        let config = PromotionConfiguration::default();
        let images = vec![image("foo", false), image("bar", false), image("baz", false)];
        let (tags, tag_names) = to_promote(&config, &images, &HashSet::new());
        assert_eq!(tags, mapping(&[("foo", "foo"), ("bar", "bar"), ("baz", "baz")]));
        assert_eq!(tag_names, names(&["foo", "bar", "baz"]));
    }

    #[test]
    fn prefix_rewrites_every_destination() {
        let config = PromotionConfiguration {
            name_prefix: "some".to_string(),
            ..PromotionConfiguration::default()
        };
        let images = vec![image("foo", false), image("bar", false), image("baz", false)];
        let (tags, tag_names) = to_promote(&config, &images, &HashSet::new());
        assert_eq!(
            tags,
            mapping(&[("somefoo", "foo"), ("somebar", "bar"), ("somebaz", "baz")])
        );
        assert_eq!(tag_names, names(&["somefoo", "somebar", "somebaz"]));
    }

    #[test]
    fn excluded_images_are_filtered() {
        let config = PromotionConfiguration {
            excluded_images: vec!["foo".to_string()],
            ..PromotionConfiguration::default()
        };
        let images = vec![image("foo", false), image("bar", false), image("baz", false)];
        let (tags, tag_names) = to_promote(&config, &images, &HashSet::new());
        assert_eq!(tags, mapping(&[("bar", "bar"), ("baz", "baz")]));
        assert_eq!(tag_names, names(&["bar", "baz"]));
    }

    #[test]
    fn optional_images_are_skipped_unless_required() {
        let config = PromotionConfiguration::default();
        let images = vec![image("foo", false), image("bar", true), image("baz", false)];

        let (tags, _) = to_promote(&config, &images, &HashSet::new());
        assert_eq!(tags, mapping(&[("foo", "foo"), ("baz", "baz")]));

        let required: HashSet<String> = ["bar".to_string()].into();
        let (tags, _) = to_promote(&config, &images, &required);
        assert_eq!(tags, mapping(&[("foo", "foo"), ("bar", "bar"), ("baz", "baz")]));
    }

    #[test]
    fn additional_images_are_appended() {
        let config = PromotionConfiguration {
            excluded_images: vec!["foo".to_string()],
            additional_images: BTreeMap::from([("boo".to_string(), "ah".to_string())]),
            ..PromotionConfiguration::default()
        };
        let images = vec![image("foo", false), image("bar", false), image("baz", false)];
        let (tags, tag_names) = to_promote(&config, &images, &HashSet::new());
        assert_eq!(tags, mapping(&[("bar", "bar"), ("baz", "baz"), ("boo", "ah")]));
        assert_eq!(tag_names, names(&["bar", "baz", "boo"]));
    }

    #[test]
    fn promoted_tags_by_stream_name() {
        let configuration = ReleaseBuildConfiguration {
            images: vec![image("foo", false)],
            promotion: Some(PromotionConfiguration {
                namespace: "roger".to_string(),
                name: "fred".to_string(),
                ..PromotionConfiguration::default()
            }),
            ..ReleaseBuildConfiguration::default()
        };
        assert_eq!(
            promoted_tags(&configuration),
            vec![ImageStreamTagReference {
                namespace: "roger".to_string(),
                name: "fred".to_string(),
                tag: "foo".to_string(),
                alias: None,
            }]
        );
    }

    #[test]
    fn promoted_tags_by_tag() {
        let configuration = ReleaseBuildConfiguration {
            images: vec![image("foo", false)],
            promotion: Some(PromotionConfiguration {
                namespace: "roger".to_string(),
                tag: "fred".to_string(),
                ..PromotionConfiguration::default()
            }),
            ..ReleaseBuildConfiguration::default()
        };
        assert_eq!(
            promoted_tags(&configuration),
            vec![ImageStreamTagReference {
                namespace: "roger".to_string(),
                name: "foo".to_string(),
                tag: "fred".to_string(),
                alias: None,
            }]
        );
    }

    #[test]
    fn no_promotion_config_means_no_tags() {
        assert!(promoted_tags(&ReleaseBuildConfiguration::default()).is_empty());
    }

    #[test]
    fn public_reference_rewrites_the_internal_host() {
        let reference = "docker-registry.default.svc:5000/ci-op-bgqwwknr/pipeline@sha256:d8385fb539f471d4f41da131366b559bb90eeeeca2edd265e10d7c2aa052a1af";
        let public = "registry.svc.ci.example.com/ci-op-bgqwwknr/pipeline";
        assert_eq!(
            public_image_reference(reference, public),
            "registry.svc.ci.example.com/ci-op-bgqwwknr/pipeline@sha256:d8385fb539f471d4f41da131366b559bb90eeeeca2edd265e10d7c2aa052a1af"
        );
    }

    #[test]
    fn public_reference_passthrough_without_internal_port() {
        let reference = "registry.example.com/ns/stream@sha256:abc";
        assert_eq!(
            public_image_reference(reference, "registry.public.example.com/ns/stream"),
            reference
        );
    }

    #[test]
    fn promotion_pod_layout_is_deterministic() {
        let mirror = BTreeMap::from([
            (
                "b-source@sha256:two".to_string(),
                "registry.example.com/ci/bin:latest".to_string(),
            ),
            (
                "a-source@sha256:one".to_string(),
                "registry.example.com/ci/applyconfig:latest".to_string(),
            ),
        ]);
        let pod = promotion_pod(&mirror, "ci-op-zyvwvffx", "registry.example.com");

        assert_eq!(pod.meta.name, "promotion");
        assert_eq!(pod.meta.namespace, "ci-op-zyvwvffx");
        assert_eq!(pod.spec.restart_policy, RestartPolicy::Never);
        assert_eq!(pod.spec.containers.len(), 1);

        let container = &pod.spec.containers[0];
        assert_eq!(container.name, "promotion");
        assert_eq!(container.command, vec!["/bin/sh", "-c"]);
        assert_eq!(
            container.args,
            vec![
                "oc image mirror --registry-config=/etc/push-secret/.dockerconfigjson a-source@sha256:one registry.example.com/ci/applyconfig:latest && \
                 oc image mirror --registry-config=/etc/push-secret/.dockerconfigjson b-source@sha256:two registry.example.com/ci/bin:latest"
            ]
        );
        assert_eq!(container.volume_mounts[0].mount_path, "/etc/push-secret");
        assert!(container.volume_mounts[0].read_only);
        assert!(matches!(
            pod.spec.volumes[0].source,
            VolumeSource::Secret { ref secret_name } if secret_name == PUSH_SECRET_NAME
        ));
    }
}
