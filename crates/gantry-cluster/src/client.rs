//! The trait boundary between the operator and a cluster.
//!
//! One implementation exists per connected cluster. All mutations follow the
//! read-mutate-write pattern; `update_*` calls fail with a conflict when the
//! resource version is stale, `patch_*` calls apply merge semantics and do
//! not conflict. Workload submission (`run_pod`, `run_build`,
//! `submit_import`) is synchronous from the caller's point of view: the call
//! returns once the workload finished or failed.

use async_trait::async_trait;

use crate::error::ClusterResult;
use crate::objects::{
    Build, ImageStream, ImageStreamImport, ImageStreamTag, Namespace, ObjectKey, Pod, Secret,
};

#[async_trait]
pub trait ClusterClient: Send + Sync {
    // Image streams.
    async fn get_image_stream(&self, key: &ObjectKey) -> ClusterResult<ImageStream>;
    async fn create_image_stream(&self, stream: &ImageStream) -> ClusterResult<()>;
    async fn update_image_stream(&self, stream: &ImageStream) -> ClusterResult<()>;
    /// Merge-patch the stream: annotations, finalizers, spec. Never conflicts.
    async fn patch_image_stream(&self, stream: &ImageStream) -> ClusterResult<()>;
    async fn delete_image_stream(&self, key: &ObjectKey) -> ClusterResult<()>;

    // Image stream tags, addressed as `<stream>:<tag>`.
    async fn get_image_stream_tag(&self, key: &ObjectKey) -> ClusterResult<ImageStreamTag>;
    async fn upsert_image_stream_tag(&self, tag: &ImageStreamTag) -> ClusterResult<()>;

    // Namespaces.
    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace>;
    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()>;

    // Secrets.
    async fn upsert_secret(&self, secret: &Secret) -> ClusterResult<()>;

    /// Submit an image stream import and return it with status populated.
    /// The import is a virtual API object: the call performs the pull
    /// synchronously.
    async fn submit_import(&self, import: ImageStreamImport) -> ClusterResult<ImageStreamImport>;

    /// Create a pod and wait for it to terminate successfully.
    async fn run_pod(&self, pod: &Pod) -> ClusterResult<()>;

    /// Create a long-running pod without waiting on it.
    async fn create_pod(&self, pod: &Pod) -> ClusterResult<()>;

    /// Submit a build and wait for it to complete successfully.
    async fn run_build(&self, build: &Build) -> ClusterResult<()>;
}

/// Ensure `namespace` exists on the cluster, creating it when absent.
/// Losing a create race to another actor is not an error.
pub async fn ensure_namespace(
    client: &dyn ClusterClient,
    namespace: &Namespace,
) -> ClusterResult<()> {
    match client.get_namespace(&namespace.meta.name).await {
        Ok(_) => Ok(()),
        Err(err) if err.is_not_found() => match client.create_namespace(namespace).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err),
        },
        Err(err) => Err(err),
    }
}
