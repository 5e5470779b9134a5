//! Step links: the semantic handles that connect producers to consumers in
//! the build graph.
//!
//! An edge exists from step `P` to step `C` iff any link in `C.requires()`
//! is satisfied by a link in `P.creates()`. Links are compared by value; the
//! [`StepLink::AllSteps`] sentinel is satisfied by every producer and is used
//! by terminal post-steps.

use serde::{Deserialize, Serialize};

/// Name of the per-job image stream holding intermediate build artifacts.
pub const PIPELINE_IMAGE_STREAM: &str = "pipeline";

/// Base name of the output image stream built images are published into.
/// A release-tag configuration may prepend a prefix to this name.
pub const STABLE_IMAGE_STREAM: &str = "stable";

/// Name of the image stream holding composite release payloads.
pub const RELEASE_IMAGE_STREAM: &str = "release-images";

/// Well-known tags in the pipeline image stream.
pub mod pipeline_tag {
    /// The build root the source clone is layered onto.
    pub const ROOT: &str = "root";
    /// Cloned repository source.
    pub const SOURCE: &str = "src";
    /// Compiled binaries cache.
    pub const BINARIES: &str = "bin";
    /// Compiled test binaries cache.
    pub const TEST_BINARIES: &str = "test-bin";
    /// Built RPMs cache.
    pub const RPMS: &str = "rpms";
    /// Operator manifests with substitutions applied.
    pub const BUNDLE_SOURCE: &str = "src-bundle";
    /// Generated operator index dockerfile image.
    pub const INDEX_GENERATOR: &str = "ci-index-gen";
    /// Built operator index image.
    pub const INDEX: &str = "ci-index";
}

/// Pipeline tag for the operator bundle at `index` in the bundle list.
pub fn bundle_tag(index: usize) -> String {
    format!("ci-bundle{index}")
}

/// Default location RPM build commands leave their artifacts in.
pub const DEFAULT_RPM_LOCATION: &str = "_output/local/releases/rpms";

/// Location the RPM serve step exposes over HTTP; build commands symlink
/// their output here.
pub const RPM_SERVE_LOCATION: &str = "/srv/repo";

/// In-repository file that may override the build root image.
pub const BUILD_ROOT_CONFIG_FILE: &str = ".gantry.yaml";

/// Names of the two release payloads emitted for a release-tag configuration.
pub const INITIAL_RELEASE: &str = "initial";
pub const LATEST_RELEASE: &str = "latest";

/// Compute the name of the stable stream for an optional release-tag prefix.
pub fn stable_stream_name(prefix: Option<&str>) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}{STABLE_IMAGE_STREAM}"),
        _ => STABLE_IMAGE_STREAM.to_string(),
    }
}

/// Environment variable carrying an explicit pull-spec override for a
/// resolved release payload.
pub fn release_image_env(name: &str) -> String {
    format!("RELEASE_IMAGE_{}", name.replace('-', "_").to_uppercase())
}

/// A semantic handle identifying something a step produces or consumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepLink {
    /// A tag in the per-job pipeline image stream.
    PipelineImage(String),
    /// A tag in the (possibly prefixed) stable output stream.
    StableImage { stream: String, tag: String },
    /// The whole stable output stream; produced by steps that populate the
    /// stream wholesale and satisfies any tag-level requirement on it.
    StableImages { stream: String },
    /// A named composite release payload.
    ReleasePayload(String),
    /// The RPM repository endpoint served out of the job namespace.
    RpmRepo,
    /// Synthetic sentinel satisfied by every step; used by terminal
    /// post-steps that must run after the whole graph.
    AllSteps,
}

impl StepLink {
    /// Whether a produced link satisfies this required link.
    pub fn satisfied_by(&self, produced: &StepLink) -> bool {
        match (self, produced) {
            (StepLink::AllSteps, _) => true,
            (StepLink::StableImage { stream, .. }, StepLink::StableImages { stream: produced }) => {
                stream == produced
            }
            _ => self == produced,
        }
    }
}

impl std::fmt::Display for StepLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepLink::PipelineImage(tag) => write!(f, "{PIPELINE_IMAGE_STREAM}:{tag}"),
            StepLink::StableImage { stream, tag } => write!(f, "{stream}:{tag}"),
            StepLink::StableImages { stream } => write!(f, "{stream}:*"),
            StepLink::ReleasePayload(name) => write!(f, "{RELEASE_IMAGE_STREAM}:{name}"),
            StepLink::RpmRepo => write!(f, "rpm-repo"),
            StepLink::AllSteps => write!(f, "<all>"),
        }
    }
}

/// True when any link in `requires` is satisfied by a link in `creates`.
pub fn links_intersect(requires: &[StepLink], creates: &[StepLink]) -> bool {
    requires
        .iter()
        .any(|r| creates.iter().any(|c| r.satisfied_by(c)))
}
