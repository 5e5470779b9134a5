//! gantry configuration model.
//!
//! Declarative build configuration types, the step-link algebra that wires
//! the build graph together, job identity, and the deferred parameter store.

pub mod config;
pub mod error;
pub mod job_spec;
pub mod link;
pub mod params;

pub use config::{
    BuildRootImageConfiguration, BundleSourceStepConfiguration, CandidateRelease,
    ContainerTestConfiguration, ImageStreamTagReference, IndexGeneratorStepConfiguration,
    InputConfiguration, InputImageTagStepConfiguration,
    InRepoBuildRootConfiguration, MultiStageStep, MultiStageTestConfiguration,
    OfficialRelease, OperatorBundleConfiguration, OperatorConfiguration,
    OutputImageTagStepConfiguration, PipelineImageCacheStepConfiguration,
    PrereleaseRelease, ProjectImageBuildConfiguration, ProjectImageBuildInputs,
    PromotionConfiguration, PullSpecSubstitution, ReleaseBuildConfiguration,
    ReleaseDescriptor, ReleaseTagConfiguration, ResolvedReleaseStepConfiguration,
    ResourceConfiguration, ResourceRequirements, RpmImageInjectionStepConfiguration,
    RpmServeStepConfiguration, SourceStepConfiguration, StepConfiguration, StepLease,
    TestConfiguration, VersionBounds, resources_for,
};
pub use error::{ApiError, ApiResult};
pub use job_spec::{JobSpec, Pull, Refs};
pub use link::{
    bundle_tag, links_intersect, pipeline_tag, release_image_env, stable_stream_name,
    StepLink, BUILD_ROOT_CONFIG_FILE, DEFAULT_RPM_LOCATION, INITIAL_RELEASE,
    LATEST_RELEASE, PIPELINE_IMAGE_STREAM, RELEASE_IMAGE_STREAM, RPM_SERVE_LOCATION,
    STABLE_IMAGE_STREAM,
};
pub use params::{static_supplier, DeferredParameters, ParameterMap, ParameterSupplier};
