//! Runnable step implementations.
//!
//! Each submodule owns one step kind and its configuration payload
//! references. Construction helpers live with the planner in
//! [`crate::defaults`].

pub mod cache;
pub mod env_shim;
pub mod images_ready;
pub mod input_image;
pub mod lease;
pub mod output_image;
pub mod project_image;
pub mod rpm;
pub mod source;
pub mod test;
pub mod write_params;

pub mod bundle;

use gantry_api::{JobSpec, ResourceRequirements, PIPELINE_IMAGE_STREAM};
use gantry_cluster::{Build, BuildSource, ObjectMeta, ObjectReference};

/// Construct a build producing `pipeline:<output_tag>` in the job namespace.
pub(crate) fn pipeline_build(
    job_spec: &JobSpec,
    name: &str,
    from_tag: Option<&str>,
    source: BuildSource,
    output_tag: &str,
    resources: &ResourceRequirements,
) -> Build {
    Build {
        meta: ObjectMeta::named(job_spec.namespace.clone(), name),
        from: from_tag.map(|tag| {
            ObjectReference::image_stream_tag(
                job_spec.namespace.clone(),
                format!("{PIPELINE_IMAGE_STREAM}:{tag}"),
            )
        }),
        source,
        output_to: ObjectReference::image_stream_tag(
            job_spec.namespace.clone(),
            format!("{PIPELINE_IMAGE_STREAM}:{output_tag}"),
        ),
        requests: resources.requests.clone(),
        limits: resources.limits.clone(),
    }
}
