//! Cluster object model and client boundary for the gantry operator.
//!
//! The operator talks to every cluster through the [`ClusterClient`] trait;
//! production wiring supplies an implementation per kubeconfig, tests use
//! [`fakes::FakeCluster`].

pub mod client;
pub mod error;
pub mod fakes;
pub mod objects;
pub mod retry;

pub use client::{ensure_namespace, ClusterClient};
pub use error::{ClusterError, ClusterResult};
pub use objects::{
    split_istag_name, Build, BuildSource, Container, EnvVar, Image, ImageImportSpec,
    ImageImportStatus, ImageStream, ImageStreamImport, ImageStreamSpec, ImageStreamStatus,
    ImageStreamTag, NamedTagEventList, Namespace, ObjectKey, ObjectMeta, ObjectReference, Pod,
    PodSpec, RestartPolicy, Secret, TagEvent, TagReference, TagReferencePolicy, Volume,
    VolumeMount, VolumeSource, DOCKER_CONFIG_JSON_KEY, SECRET_TYPE_DOCKER_CONFIG_JSON,
};
pub use retry::{retry_on_conflict, Backoff};
