//! The subset of the cluster object model the operator reads and writes.
//!
//! Objects are addressed by `(namespace, name)` and versioned with a
//! resource version for optimistic concurrency. The operator never parses
//! image contents; image streams and their tags carry pull specs only.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Secret key conventionally holding a docker registry config.
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Secret type for docker registry configs.
pub const SECRET_TYPE_DOCKER_CONFIG_JSON: &str = "kubernetes.io/dockerconfigjson";

/// Address of an object within a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Common object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub annotations: BTreeMap<String, String>,
    pub finalizers: Vec<String>,
    /// Optimistic-concurrency token; 0 means "not yet persisted".
    pub resource_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }
}

/// Reference to another object, by kind and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl ObjectReference {
    pub fn docker_image(name: impl Into<String>) -> Self {
        Self {
            kind: "DockerImage".to_string(),
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn image_stream_tag(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: "ImageStreamTag".to_string(),
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// How a tag references its image when consumed inside the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagReferencePolicy {
    #[default]
    Source,
    Local,
}

/// A tag in an image stream spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ObjectReference>,
    pub reference_policy: TagReferencePolicy,
}

/// One historical event on a status tag; the first item is current.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagEvent {
    /// Pull spec that can be used to fetch this image.
    pub docker_image_reference: String,
    /// Image name (digest).
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedTagEventList {
    pub tag: String,
    pub items: Vec<TagEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStreamSpec {
    pub lookup_policy_local: bool,
    pub tags: Vec<TagReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStreamStatus {
    pub docker_image_repository: String,
    pub public_docker_image_repository: String,
    pub tags: Vec<NamedTagEventList>,
}

/// A named stream of image tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStream {
    pub meta: ObjectMeta,
    pub spec: ImageStreamSpec,
    pub status: ImageStreamStatus,
}

impl ImageStream {
    /// The current pull spec recorded for `tag` in the status block, if any.
    pub fn find_status_tag(&self, tag: &str) -> Option<&TagEvent> {
        self.status
            .tags
            .iter()
            .find(|t| t.tag == tag)
            .and_then(|t| t.items.first())
    }
}

/// A single image, named by digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Image {
    /// Digest-form name, e.g. `sha256:abcd...`.
    pub name: String,
    pub docker_image_reference: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

/// A single tag of an image stream, addressable as `<stream>:<tag>`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStreamTag {
    pub meta: ObjectMeta,
    pub image: Image,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<TagReference>,
}

/// Split an `ImageStreamTag` object name into `(stream, tag)`.
pub fn split_istag_name(name: &str) -> Option<(&str, &str)> {
    let mut parts = name.splitn(2, ':');
    match (parts.next(), parts.next()) {
        (Some(stream), Some(tag)) if !stream.is_empty() && !tag.is_empty() => Some((stream, tag)),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageImportSpec {
    pub from: ObjectReference,
    pub to: String,
    pub reference_policy: TagReferencePolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageImportStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
    pub reason: String,
    pub message: String,
}

/// A synchronous request to pull external image references into stream tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStreamImport {
    pub meta: ObjectMeta,
    pub import: bool,
    pub images: Vec<ImageImportSpec>,
    pub status_images: Vec<ImageImportStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Namespace {
    pub meta: ObjectMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub meta: ObjectMeta,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeSource {
    Secret { secret_name: String },
    EmptyDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Container {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    pub volume_mounts: Vec<VolumeMount>,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PodSpec {
    pub restart_policy: RestartPolicy,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub service_account: String,
}

/// A workload pod submitted by a step and awaited to completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pod {
    pub meta: ObjectMeta,
    pub spec: PodSpec,
}

/// How a build derives its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSource {
    /// Layer shell commands onto the input image.
    Commands { commands: String },
    /// Build from a dockerfile within the cloned source tree.
    Dockerfile {
        dockerfile_path: String,
        context_dir: String,
    },
}

/// An image build submitted to the cluster build system and awaited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub meta: ObjectMeta,
    /// Image the build starts from, when any.
    pub from: Option<ObjectReference>,
    pub source: BuildSource,
    /// Pipeline tag the produced image is pushed to.
    pub output_to: ObjectReference,
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}
