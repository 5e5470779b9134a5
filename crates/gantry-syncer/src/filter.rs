//! Inclusion predicate for the streams the syncer manages.

use std::collections::HashSet;

use gantry_cluster::{split_istag_name, ImageStream};
use tracing::error;

/// A request to reconcile one `(namespace, stream:tag)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReconcileRequest {
    pub namespace: String,
    /// `<stream>:<tag>` form.
    pub name: String,
}

impl std::fmt::Display for ReconcileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Which image stream tags are kept in sync.
///
/// A tag is included when it matches any of the exact-tag, exact-stream,
/// stream-prefix or namespace sets, and its stream is not denied. Denial
/// wins over every inclusion rule.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    /// Exact `namespace/stream:tag` entries.
    pub image_stream_tags: HashSet<String>,
    /// Exact `namespace/stream` entries.
    pub image_streams: HashSet<String>,
    /// Prefixes matched against `namespace/stream`.
    pub image_stream_prefixes: HashSet<String>,
    /// Whole namespaces.
    pub image_stream_namespaces: HashSet<String>,
    /// Denied `namespace/stream` entries.
    pub denied_image_streams: HashSet<String>,
}

impl StreamFilter {
    pub fn allows(&self, namespace: &str, istag_name: &str) -> bool {
        let Some((stream, _tag)) = split_istag_name(istag_name) else {
            error!(
                namespace,
                name = istag_name,
                "failed to derive the imagestream name from the imagestreamtag name"
            );
            return false;
        };
        let stream_key = format!("{namespace}/{stream}");
        if self.denied_image_streams.contains(&stream_key) {
            return false;
        }
        if self
            .image_stream_tags
            .contains(&format!("{namespace}/{istag_name}"))
        {
            return true;
        }
        if self.image_stream_namespaces.contains(namespace) {
            return true;
        }
        if self.image_streams.contains(&stream_key) {
            return true;
        }
        self.image_stream_prefixes
            .iter()
            .any(|prefix| stream_key.starts_with(prefix))
    }
}

/// Map a stream event to one reconcile request per tag, filtered.
///
/// Image stream tags do not support watches, so stream events are expanded
/// into per-tag requests here.
pub fn requests_for_stream(filter: &StreamFilter, stream: &ImageStream) -> Vec<ReconcileRequest> {
    let mut tags: Vec<&str> = stream.status.tags.iter().map(|t| t.tag.as_str()).collect();
    for tag in &stream.spec.tags {
        if !tags.contains(&tag.name.as_str()) {
            tags.push(&tag.name);
        }
    }

    tags.into_iter()
        .filter_map(|tag| {
            let name = format!("{}:{tag}", stream.meta.name);
            filter
                .allows(&stream.meta.namespace, &name)
                .then(|| ReconcileRequest {
                    namespace: stream.meta.namespace.clone(),
                    name,
                })
        })
        .collect()
}
