//! The registry-sync reconciler.
//!
//! For a curated set of image streams, keeps image stream tags identical
//! across the registry clusters. The cluster holding the newest image for a
//! tag is the source; every other cluster imports the source's public pull
//! spec. Deletion is coordinated through a finalizer on the source stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use gantry_cluster::{
    split_istag_name, ClusterClient, ImageImportSpec, ImageStream, ImageStreamImport,
    ImageStreamTag, Namespace, ObjectKey, ObjectMeta, ObjectReference, Secret,
    TagReferencePolicy, DOCKER_CONFIG_JSON_KEY, SECRET_TYPE_DOCKER_CONFIG_JSON,
};

use crate::error::{SyncError, SyncResult};
use crate::filter::{requests_for_stream, ReconcileRequest, StreamFilter};
use crate::metrics::METRICS;
use crate::sharded_lock::{ShardedLock, StreamKey};

/// Stable identity of this controller.
pub const CONTROLLER_NAME: &str = "registry-syncer";

/// Finalizer owned by this controller; blocks stream deletion until the
/// copies on the other clusters are gone.
pub const SYNC_FINALIZER: &str = "gantry.dev/registry-syncer";

/// Annotation recording which controller created a namespace.
pub const REQUESTER_ANNOTATION: &str = "gantry.dev/requester";

/// Name of the pull secret ensured in every synced namespace.
pub const PULL_SECRET_NAME: &str = "registry-cluster-pull-secret";

/// Only annotations with this prefix are propagated to ensured streams; the
/// release tooling derives versions from them.
pub const RELEASE_CONFIG_ANNOTATION_PREFIX: &str = "release.gantry.dev";

const CACHE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CACHE_POLL_DEADLINE: Duration = Duration::from_secs(5);

/// Registry hostnames of one cluster, for public-domain rewriting and
/// back-reference detection.
#[derive(Debug, Clone)]
pub struct ClusterRegistry {
    /// In-cluster service host and port, e.g. `image-registry.svc:5000`.
    pub internal_host: String,
    /// Public registry hostname, e.g. `registry.build01.example.com`.
    pub public_host: String,
}

/// Supplier for the docker config used by ensured pull secrets.
pub type PullSecretSource = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

pub struct RegistrySyncer {
    /// Clients per cluster; iteration order is the tie-break order for
    /// source selection.
    clients: BTreeMap<String, Arc<dyn ClusterClient>>,
    registries: BTreeMap<String, ClusterRegistry>,
    pull_secret: PullSecretSource,
    filter: StreamFilter,
    locks: Arc<ShardedLock>,
    read_only: bool,
}

impl RegistrySyncer {
    pub fn new(
        clients: BTreeMap<String, Arc<dyn ClusterClient>>,
        registries: BTreeMap<String, ClusterRegistry>,
        pull_secret: PullSecretSource,
        filter: StreamFilter,
        read_only: bool,
    ) -> Self {
        Self {
            clients,
            registries,
            pull_secret,
            filter,
            locks: Arc::new(ShardedLock::new()),
            read_only,
        }
    }

    /// Expand a stream event into filtered per-tag reconcile requests.
    pub fn requests_for(&self, stream: &ImageStream) -> Vec<ReconcileRequest> {
        requests_for_stream(&self.filter, stream)
    }

    /// Run `workers` concurrent reconcile loops over the request channel,
    /// plus the hourly lock cleaner, until cancelled.
    pub async fn run(
        self: Arc<Self>,
        requests: mpsc::Receiver<ReconcileRequest>,
        workers: usize,
        cancel: CancellationToken,
    ) {
        let cleaner = Arc::clone(&self.locks).spawn_cleaner(Duration::from_secs(3600));
        let requests = Arc::new(Mutex::new(requests));

        let mut handles = Vec::new();
        for worker in 0..workers.max(1) {
            let syncer = Arc::clone(&self);
            let requests = Arc::clone(&requests);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let request = {
                        let mut rx = requests.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            request = rx.recv() => request,
                        }
                    };
                    let Some(request) = request else {
                        break;
                    };
                    debug!(worker, request = %request, "starting reconciliation");
                    syncer.process(&request).await;
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        cleaner.abort();
    }

    /// Reconcile one request, logging the outcome and suppressing terminal
    /// errors from rescheduling.
    pub async fn process(&self, request: &ReconcileRequest) {
        match self.reconcile(request).await {
            Ok(()) => info!(request = %request, "finished reconciliation"),
            Err(err) if err.is_terminal() => {
                debug!(request = %request, "reconciliation interrupted")
            }
            Err(err) => error!(request = %request, error = %err, "reconciliation failed"),
        }
    }

    /// The reconcile body. Holds the per-stream lock for its whole duration.
    pub async fn reconcile(&self, request: &ReconcileRequest) -> SyncResult<()> {
        let (stream_name, image_tag) =
            split_istag_name(&request.name).ok_or_else(|| SyncError::MalformedRequest {
                name: request.name.clone(),
            })?;
        let key = StreamKey::new(request.namespace.clone(), stream_name);
        let lock = self.locks.get_lock(&key).await;
        let _guard = lock.lock().await;

        let istag_key = ObjectKey::new(request.namespace.clone(), request.name.clone());
        let mut istags: BTreeMap<&str, ImageStreamTag> = BTreeMap::new();
        for (cluster, client) in &self.clients {
            match client.get_image_stream_tag(&istag_key).await {
                Ok(tag) => {
                    istags.insert(cluster.as_str(), tag);
                }
                Err(err) if err.is_not_found() => {
                    debug!(cluster = %cluster, "imagestreamtag not found");
                }
                Err(err) => return Err(err.into()),
            }
        }

        // The newest image wins; absence everywhere is not an error.
        let Some(source_cluster) = find_newest(&istags) else {
            return Ok(());
        };
        let source_tag = &istags[source_cluster];
        let source_client = &self.clients[source_cluster];

        let stream_key = ObjectKey::new(request.namespace.clone(), stream_name);
        let source_stream = source_client.get_image_stream(&stream_key).await?;

        if source_stream.meta.deletion_timestamp.is_some() {
            self.finalize_if_needed(&source_stream, source_cluster).await?;
            return Ok(());
        }

        ensure_finalizer(source_client.as_ref(), &source_stream).await?;

        for (cluster, client) in &self.clients {
            if cluster == source_cluster {
                continue;
            }
            if self.imported_from_cluster(cluster, source_tag) {
                debug!(cluster = %cluster, "image was imported from the targeted cluster");
                continue;
            }

            self.ensure_namespace(client.as_ref(), &request.namespace).await?;
            self.ensure_image_stream(client.as_ref(), &source_stream).await?;
            self.wait_for_stream(client.as_ref(), cluster, &stream_key).await?;

            if let Some(existing) = istags.get(cluster.as_str()) {
                if existing.image.name == source_tag.image.name {
                    debug!(cluster = %cluster, "imagestreamtag is current");
                    continue;
                }
            }

            self.ensure_pull_secret(client.as_ref(), &request.namespace).await?;

            let public_spec =
                self.public_domain_for_image(source_cluster, &source_tag.image.docker_image_reference)?;

            let import = ImageStreamImport {
                meta: ObjectMeta::named(request.namespace.clone(), stream_name),
                import: true,
                images: vec![ImageImportSpec {
                    from: ObjectReference::docker_image(public_spec),
                    to: image_tag.to_string(),
                    reference_policy: TagReferencePolicy::Local,
                }],
                ..ImageStreamImport::default()
            };

            if self.read_only {
                debug!(cluster = %cluster, "read-only mode, skipping import submission");
                continue;
            }
            match submit_and_check(client.as_ref(), import).await {
                Ok(()) => {
                    METRICS.count_import(cluster, &request.namespace, stream_name, true);
                    debug!(cluster = %cluster, "imported successfully");
                }
                Err(err) => {
                    METRICS.count_import(cluster, &request.namespace, stream_name, false);
                    return Err(SyncError::ImportFailed {
                        cluster: cluster.clone(),
                        source: err,
                    });
                }
            }
        }
        Ok(())
    }

    /// Tear down the copies of a deleted source stream, then release the
    /// source. Non-source clusters lose their finalizer first so their
    /// deletes complete; the source's finalizer is removed last.
    async fn finalize_if_needed(
        &self,
        stream: &ImageStream,
        source_cluster: &str,
    ) -> SyncResult<()> {
        if !stream.meta.has_finalizer(SYNC_FINALIZER) {
            return Ok(());
        }
        let key = stream.meta.key();
        for (cluster, client) in &self.clients {
            if cluster == source_cluster {
                continue;
            }
            let copy = match client.get_image_stream(&key).await {
                Ok(copy) => copy,
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            };
            ensure_remove_finalizer(client.as_ref(), &copy).await?;
            match client.delete_image_stream(&key).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }
        ensure_remove_finalizer(self.clients[source_cluster].as_ref(), stream).await
    }

    /// A source tag whose reference already points into the target cluster's
    /// registry must not be re-imported there.
    fn imported_from_cluster(&self, cluster: &str, tag: &ImageStreamTag) -> bool {
        let Some(registry) = self.registries.get(cluster) else {
            return false;
        };
        let Some(reference) = tag.tag.as_ref().and_then(|t| t.from.as_ref()) else {
            return false;
        };
        reference.kind == "DockerImage" && reference.name.starts_with(&registry.public_host)
    }

    /// Replace the source cluster's internal registry host with its public
    /// hostname; the mapping is keyed by cluster identity.
    fn public_domain_for_image(&self, cluster: &str, reference: &str) -> SyncResult<String> {
        let registry = self
            .registries
            .get(cluster)
            .ok_or_else(|| SyncError::UnknownCluster(cluster.to_string()))?;
        Ok(reference.replace(&registry.internal_host, &registry.public_host))
    }

    async fn ensure_namespace(&self, client: &dyn ClusterClient, namespace: &str) -> SyncResult<()> {
        match client.get_namespace(namespace).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        let namespace = Namespace {
            meta: ObjectMeta {
                name: namespace.to_string(),
                annotations: BTreeMap::from([(
                    REQUESTER_ANNOTATION.to_string(),
                    CONTROLLER_NAME.to_string(),
                )]),
                ..ObjectMeta::default()
            },
        };
        match client.create_namespace(&namespace).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_exists() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Create or update the stream on the target, copying only the
    /// release-config annotations and the lookup policy.
    async fn ensure_image_stream(
        &self,
        client: &dyn ClusterClient,
        source: &ImageStream,
    ) -> SyncResult<()> {
        let mut desired = ImageStream {
            meta: ObjectMeta::named(source.meta.namespace.clone(), source.meta.name.clone()),
            ..ImageStream::default()
        };
        for (k, v) in &source.meta.annotations {
            if k.starts_with(RELEASE_CONFIG_ANNOTATION_PREFIX) {
                desired.meta.annotations.insert(k.clone(), v.clone());
            }
        }
        desired.spec.lookup_policy_local = source.spec.lookup_policy_local;

        match client.get_image_stream(&desired.meta.key()).await {
            Ok(existing) => {
                desired.meta.finalizers = existing.meta.finalizers.clone();
                client.patch_image_stream(&desired).await?;
                Ok(())
            }
            Err(err) if err.is_not_found() => match client.create_image_stream(&desired).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_already_exists() => Ok(()),
                Err(err) => Err(err.into()),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// There is some delay until a created stream gets back to the cache,
    /// so block until it can be retrieved.
    async fn wait_for_stream(
        &self,
        client: &dyn ClusterClient,
        cluster: &str,
        key: &ObjectKey,
    ) -> SyncResult<()> {
        let deadline = Instant::now() + CACHE_POLL_DEADLINE;
        loop {
            match client.get_image_stream(key).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
            if Instant::now() >= deadline {
                return Err(SyncError::CacheTimeout {
                    cluster: cluster.to_string(),
                    key: key.clone(),
                });
            }
            tokio::time::sleep(CACHE_POLL_INTERVAL).await;
        }
    }

    async fn ensure_pull_secret(
        &self,
        client: &dyn ClusterClient,
        namespace: &str,
    ) -> SyncResult<()> {
        let secret = Secret {
            meta: ObjectMeta::named(namespace, PULL_SECRET_NAME),
            secret_type: SECRET_TYPE_DOCKER_CONFIG_JSON.to_string(),
            data: BTreeMap::from([(DOCKER_CONFIG_JSON_KEY.to_string(), (self.pull_secret)())]),
        };
        client.upsert_secret(&secret).await?;
        Ok(())
    }
}

/// The cluster whose tag carries the latest image creation time. Ties keep
/// the earlier cluster in iteration order; `None` when no cluster has a
/// timestamped image.
fn find_newest<'a>(istags: &'a BTreeMap<&'a str, ImageStreamTag>) -> Option<&'a str> {
    let mut result = None;
    let mut newest: Option<chrono::DateTime<chrono::Utc>> = None;
    for (cluster, istag) in istags {
        let Some(created) = istag.image.creation_timestamp else {
            continue;
        };
        if newest.map_or(true, |t| t < created) {
            newest = Some(created);
            result = Some(*cluster);
        }
    }
    result
}

async fn ensure_finalizer(client: &dyn ClusterClient, stream: &ImageStream) -> SyncResult<()> {
    if stream.meta.has_finalizer(SYNC_FINALIZER) {
        return Ok(());
    }
    // Patch instead of update to avoid conflicting with other writers.
    let mut patched = stream.clone();
    patched.meta.finalizers.push(SYNC_FINALIZER.to_string());
    client.patch_image_stream(&patched).await?;
    Ok(())
}

async fn ensure_remove_finalizer(
    client: &dyn ClusterClient,
    stream: &ImageStream,
) -> SyncResult<()> {
    if !stream.meta.has_finalizer(SYNC_FINALIZER) {
        return Ok(());
    }
    let mut patched = stream.clone();
    patched.meta.finalizers.retain(|f| f != SYNC_FINALIZER);
    client.patch_image_stream(&patched).await?;
    Ok(())
}

/// The import is a virtual API object performing the pull synchronously; a
/// status without an image record means the import failed.
async fn submit_and_check(
    client: &dyn ClusterClient,
    import: ImageStreamImport,
) -> gantry_cluster::ClusterResult<()> {
    let answered = client.submit_import(import).await?;
    let status = answered.status_images.first();
    match status.and_then(|s| s.image.as_ref()) {
        Some(_) => Ok(()),
        None => Err(gantry_cluster::ClusterError::ImportFailed {
            key: answered.meta.key(),
            reason: status.map(|s| s.reason.clone()).unwrap_or_default(),
            message: status.map(|s| s.message.clone()).unwrap_or_default(),
        }),
    }
}
