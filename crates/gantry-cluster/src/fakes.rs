//! In-memory fake cluster for tests.
//!
//! `FakeCluster` satisfies [`ClusterClient`] with `HashMap`-backed storage,
//! real resource-version conflict semantics on updates, and knobs for
//! failure injection: forced update conflicts, failing workloads, and
//! imports that report no image.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::client::ClusterClient;
use crate::error::{ClusterError, ClusterResult};
use crate::objects::{
    Build, Image, ImageStream, ImageStreamImport, ImageStreamTag, ImageImportStatus, Namespace,
    ObjectKey, Pod, Secret,
};

/// How the fake answers import submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Materialize the imported image and its stream tag.
    Materialize,
    /// Report a status with no image record.
    FailNoImage,
}

#[derive(Default)]
struct Inner {
    rv_counter: u64,
    streams: HashMap<ObjectKey, ImageStream>,
    istags: HashMap<ObjectKey, ImageStreamTag>,
    namespaces: HashMap<String, Namespace>,
    secrets: HashMap<ObjectKey, Secret>,
    pods: Vec<Pod>,
    builds: Vec<Build>,
    imports: Vec<ImageStreamImport>,
    failing_pods: HashSet<String>,
    failing_builds: HashSet<String>,
    forced_conflicts: u32,
}

/// An in-memory cluster.
pub struct FakeCluster {
    name: String,
    import_mode: Mutex<ImportMode>,
    inner: Mutex<Inner>,
}

impl FakeCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            import_mode: Mutex::new(ImportMode::Materialize),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Seed a stream directly into storage, assigning a resource version.
    pub fn seed_image_stream(&self, mut stream: ImageStream) {
        let mut inner = self.inner.lock().unwrap();
        inner.rv_counter += 1;
        stream.meta.resource_version = inner.rv_counter;
        if stream.meta.creation_timestamp.is_none() {
            stream.meta.creation_timestamp = Some(Utc::now());
        }
        inner.streams.insert(stream.meta.key(), stream);
    }

    /// Seed a stream tag directly into storage.
    pub fn seed_image_stream_tag(&self, mut tag: ImageStreamTag) {
        let mut inner = self.inner.lock().unwrap();
        inner.rv_counter += 1;
        tag.meta.resource_version = inner.rv_counter;
        inner.istags.insert(tag.meta.key(), tag);
    }

    /// Force the next `count` image-stream updates to fail with a conflict.
    pub fn force_update_conflicts(&self, count: u32) {
        self.inner.lock().unwrap().forced_conflicts = count;
    }

    /// Make `run_pod` fail for the pod with the given name.
    pub fn fail_pod(&self, name: impl Into<String>) {
        self.inner.lock().unwrap().failing_pods.insert(name.into());
    }

    /// Make `run_build` fail for the build with the given name.
    pub fn fail_build(&self, name: impl Into<String>) {
        self.inner.lock().unwrap().failing_builds.insert(name.into());
    }

    pub fn set_import_mode(&self, mode: ImportMode) {
        *self.import_mode.lock().unwrap() = mode;
    }

    pub fn submitted_pods(&self) -> Vec<Pod> {
        self.inner.lock().unwrap().pods.clone()
    }

    pub fn submitted_builds(&self) -> Vec<Build> {
        self.inner.lock().unwrap().builds.clone()
    }

    pub fn submitted_imports(&self) -> Vec<ImageStreamImport> {
        self.inner.lock().unwrap().imports.clone()
    }

    pub fn image_stream(&self, key: &ObjectKey) -> Option<ImageStream> {
        self.inner.lock().unwrap().streams.get(key).cloned()
    }

    pub fn image_stream_tag(&self, key: &ObjectKey) -> Option<ImageStreamTag> {
        self.inner.lock().unwrap().istags.get(key).cloned()
    }

    pub fn secret(&self, key: &ObjectKey) -> Option<Secret> {
        self.inner.lock().unwrap().secrets.get(key).cloned()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_image_stream(&self, key: &ObjectKey) -> ClusterResult<ImageStream> {
        self.inner
            .lock()
            .unwrap()
            .streams
            .get(key)
            .cloned()
            .ok_or(ClusterError::NotFound {
                kind: "imagestream",
                key: key.clone(),
            })
    }

    async fn create_image_stream(&self, stream: &ImageStream) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = stream.meta.key();
        if inner.streams.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: "imagestream",
                key,
            });
        }
        let mut stored = stream.clone();
        inner.rv_counter += 1;
        stored.meta.resource_version = inner.rv_counter;
        stored.meta.creation_timestamp = Some(Utc::now());
        inner.streams.insert(key, stored);
        Ok(())
    }

    async fn update_image_stream(&self, stream: &ImageStream) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = stream.meta.key();
        if inner.forced_conflicts > 0 {
            inner.forced_conflicts -= 1;
            return Err(ClusterError::Conflict {
                kind: "imagestream",
                key,
            });
        }
        let stored = inner.streams.get(&key).ok_or(ClusterError::NotFound {
            kind: "imagestream",
            key: key.clone(),
        })?;
        if stored.meta.resource_version != stream.meta.resource_version {
            return Err(ClusterError::Conflict {
                kind: "imagestream",
                key,
            });
        }
        let mut updated = stream.clone();
        inner.rv_counter += 1;
        updated.meta.resource_version = inner.rv_counter;
        inner.streams.insert(key, updated);
        Ok(())
    }

    async fn patch_image_stream(&self, stream: &ImageStream) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = stream.meta.key();
        inner.rv_counter += 1;
        let next_rv = inner.rv_counter;
        let stored = inner.streams.get_mut(&key).ok_or(ClusterError::NotFound {
            kind: "imagestream",
            key: key.clone(),
        })?;
        for (k, v) in &stream.meta.annotations {
            stored.meta.annotations.insert(k.clone(), v.clone());
        }
        stored.meta.finalizers = stream.meta.finalizers.clone();
        stored.spec = stream.spec.clone();
        stored.meta.resource_version = next_rv;
        Ok(())
    }

    async fn delete_image_stream(&self, key: &ObjectKey) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.streams.remove(key).is_none() {
            return Err(ClusterError::NotFound {
                kind: "imagestream",
                key: key.clone(),
            });
        }
        Ok(())
    }

    async fn get_image_stream_tag(&self, key: &ObjectKey) -> ClusterResult<ImageStreamTag> {
        self.inner
            .lock()
            .unwrap()
            .istags
            .get(key)
            .cloned()
            .ok_or(ClusterError::NotFound {
                kind: "imagestreamtag",
                key: key.clone(),
            })
    }

    async fn upsert_image_stream_tag(&self, tag: &ImageStreamTag) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut stored = tag.clone();
        inner.rv_counter += 1;
        stored.meta.resource_version = inner.rv_counter;
        inner.istags.insert(stored.meta.key(), stored);
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> ClusterResult<Namespace> {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .get(name)
            .cloned()
            .ok_or(ClusterError::NotFound {
                kind: "namespace",
                key: ObjectKey::new("", name),
            })
    }

    async fn create_namespace(&self, namespace: &Namespace) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.namespaces.contains_key(&namespace.meta.name) {
            return Err(ClusterError::AlreadyExists {
                kind: "namespace",
                key: ObjectKey::new("", namespace.meta.name.clone()),
            });
        }
        inner
            .namespaces
            .insert(namespace.meta.name.clone(), namespace.clone());
        Ok(())
    }

    async fn upsert_secret(&self, secret: &Secret) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.secrets.insert(secret.meta.key(), secret.clone());
        Ok(())
    }

    async fn submit_import(&self, import: ImageStreamImport) -> ClusterResult<ImageStreamImport> {
        let mode = *self.import_mode.lock().unwrap();
        let mut answered = import.clone();
        match mode {
            ImportMode::FailNoImage => {
                answered.status_images = import
                    .images
                    .iter()
                    .map(|_| ImageImportStatus {
                        image: None,
                        reason: "Unauthorized".to_string(),
                        message: "import failed".to_string(),
                    })
                    .collect();
            }
            ImportMode::Materialize => {
                let mut inner = self.inner.lock().unwrap();
                for spec in &import.images {
                    let digest = spec
                        .from
                        .name
                        .rsplit_once('@')
                        .map(|(_, digest)| digest.to_string())
                        .unwrap_or_else(|| format!("sha256:{:x}", fxhash(&spec.from.name)));
                    let image = Image {
                        name: digest,
                        docker_image_reference: spec.from.name.clone(),
                        creation_timestamp: Some(Utc::now()),
                    };
                    let tag_key = ObjectKey::new(
                        import.meta.namespace.clone(),
                        format!("{}:{}", import.meta.name, spec.to),
                    );
                    inner.rv_counter += 1;
                    let resource_version = inner.rv_counter;
                    inner.istags.insert(
                        tag_key.clone(),
                        ImageStreamTag {
                            meta: crate::objects::ObjectMeta {
                                name: tag_key.name.clone(),
                                namespace: tag_key.namespace.clone(),
                                resource_version,
                                ..crate::objects::ObjectMeta::default()
                            },
                            image: image.clone(),
                            tag: None,
                        },
                    );
                    answered.status_images.push(ImageImportStatus {
                        image: Some(image),
                        ..ImageImportStatus::default()
                    });
                }
            }
        }
        self.inner.lock().unwrap().imports.push(answered.clone());
        Ok(answered)
    }

    async fn run_pod(&self, pod: &Pod) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.pods.push(pod.clone());
        if inner.failing_pods.contains(&pod.meta.name) {
            return Err(ClusterError::WorkloadFailed(format!(
                "pod {}",
                pod.meta.name
            )));
        }
        Ok(())
    }

    async fn create_pod(&self, pod: &Pod) -> ClusterResult<()> {
        self.inner.lock().unwrap().pods.push(pod.clone());
        Ok(())
    }

    async fn run_build(&self, build: &Build) -> ClusterResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.builds.push(build.clone());
        if inner.failing_builds.contains(&build.meta.name) {
            return Err(ClusterError::WorkloadFailed(format!(
                "build {}",
                build.meta.name
            )));
        }
        Ok(())
    }
}

/// Small deterministic hash for fabricated digests.
fn fxhash(input: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ImageImportSpec, ObjectMeta, ObjectReference};

    #[tokio::test]
    async fn update_detects_stale_resource_version() {
        let cluster = FakeCluster::new("build01");
        cluster.seed_image_stream(ImageStream {
            meta: ObjectMeta::named("ci", "pipeline"),
            ..ImageStream::default()
        });

        let key = ObjectKey::new("ci", "pipeline");
        let fresh = cluster.get_image_stream(&key).await.unwrap();
        cluster.update_image_stream(&fresh).await.unwrap();

        // The first read is now stale.
        let result = cluster.update_image_stream(&fresh).await;
        assert!(matches!(result, Err(ref err) if err.is_conflict()));
    }

    #[tokio::test]
    async fn forced_conflicts_drain() {
        let cluster = FakeCluster::new("build01");
        cluster.seed_image_stream(ImageStream {
            meta: ObjectMeta::named("ci", "pipeline"),
            ..ImageStream::default()
        });
        cluster.force_update_conflicts(1);

        let key = ObjectKey::new("ci", "pipeline");
        let fresh = cluster.get_image_stream(&key).await.unwrap();
        assert!(cluster.update_image_stream(&fresh).await.is_err());
        let fresh = cluster.get_image_stream(&key).await.unwrap();
        assert!(cluster.update_image_stream(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn materializing_import_creates_the_tag() {
        let cluster = FakeCluster::new("build02");
        let import = ImageStreamImport {
            meta: ObjectMeta::named("ci", "tools"),
            import: true,
            images: vec![ImageImportSpec {
                from: ObjectReference::docker_image("registry.example.com/ci/tools@sha256:abc"),
                to: "latest".to_string(),
                ..ImageImportSpec::default()
            }],
            ..ImageStreamImport::default()
        };

        let answered = cluster.submit_import(import).await.unwrap();
        assert_eq!(
            answered.status_images[0].image.as_ref().unwrap().name,
            "sha256:abc"
        );
        assert!(cluster
            .image_stream_tag(&ObjectKey::new("ci", "tools:latest"))
            .is_some());
    }

    #[tokio::test]
    async fn failing_import_reports_no_image() {
        let cluster = FakeCluster::new("build02");
        cluster.set_import_mode(ImportMode::FailNoImage);
        let import = ImageStreamImport {
            meta: ObjectMeta::named("ci", "tools"),
            import: true,
            images: vec![ImageImportSpec {
                from: ObjectReference::docker_image("registry.example.com/ci/tools:latest"),
                to: "latest".to_string(),
                ..ImageImportSpec::default()
            }],
            ..ImageStreamImport::default()
        };
        let answered = cluster.submit_import(import).await.unwrap();
        assert!(answered.status_images[0].image.is_none());
    }
}
