//! The declarative per-repository build configuration.
//!
//! A [`ReleaseBuildConfiguration`] is authored by repository owners and
//! interpreted by the planner into a set of step descriptors. The types here
//! mirror the configuration document shape; they carry no behavior beyond
//! small accessors and validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reference to a tag in an image stream on some cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageStreamTagReference {
    pub namespace: String,
    pub name: String,
    pub tag: String,
    /// Alias under which the image is exposed in the pipeline stream.
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ImageStreamTagReference {
    /// `name:tag` form used when addressing the `ImageStreamTag` object.
    pub fn istag_name(&self) -> String {
        format!("{}:{}", self.name, self.tag)
    }
}

impl std::fmt::Display for ImageStreamTagReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.tag)
    }
}

/// Compute resources requested for a step, keyed by step name with `*` as
/// the fallback entry.
pub type ResourceConfiguration = BTreeMap<String, ResourceRequirements>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRequirements {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

/// Look up the resource requirements for `name`, falling back to `*`.
pub fn resources_for(resources: &ResourceConfiguration, name: &str) -> ResourceRequirements {
    resources
        .get(name)
        .or_else(|| resources.get("*"))
        .cloned()
        .unwrap_or_default()
}

/// Where the build root image comes from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildRootImageConfiguration {
    /// An explicit image stream tag to use as build root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_stream_tag: Option<ImageStreamTagReference>,
    /// Build the root from a dockerfile in the repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_image: Option<ProjectImageBuildInputs>,
    /// Read the image stream tag reference from a file in the repository
    /// instead of this configuration.
    pub from_repository: bool,
}

/// Shape of the in-repository build-root override file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InRepoBuildRootConfiguration {
    pub build_root_image: ImageStreamTagReference,
}

/// Configuration for importing release component images into a stable
/// stream, and the prefix applied to output streams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseTagConfiguration {
    pub namespace: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
}

/// The input side of the configuration: what images the build starts from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfiguration {
    pub base_images: BTreeMap<String, ImageStreamTagReference>,
    pub base_rpm_images: BTreeMap<String, ImageStreamTagReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_root: Option<BuildRootImageConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_tag_configuration: Option<ReleaseTagConfiguration>,
}

/// Inputs for building an image from a directory of the project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectImageBuildInputs {
    pub dockerfile_path: String,
    pub context_dir: String,
}

/// A project image to build and publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectImageBuildConfiguration {
    /// Pipeline tag the built image lands on; also the published component
    /// name.
    pub to: String,
    #[serde(flatten)]
    pub inputs: ProjectImageBuildInputs,
    /// Optional images are built but only published when required.
    pub optional: bool,
}

/// A value substitution applied to operator manifests before bundling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullSpecSubstitution {
    pub pullspec: String,
    pub with: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorBundleConfiguration {
    pub context_dir: String,
    pub dockerfile_path: String,
}

/// Operator bundle and index build configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfiguration {
    pub substitutions: Vec<PullSpecSubstitution>,
    pub bundles: Vec<OperatorBundleConfiguration>,
}

/// A lease a step acquires before running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepLease {
    pub resource_type: String,
    /// Environment variable the acquired lease name is exposed under.
    pub env: String,
    pub count: u32,
}

/// One stage of a multi-stage test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiStageStep {
    #[serde(rename = "as")]
    pub name: String,
    /// Pipeline or stable tag the stage runs from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// An external image the stage runs from; imported into the pipeline
    /// stream before execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_image: Option<ImageStreamTagReference>,
    pub commands: String,
    pub leases: Vec<StepLease>,
}

impl MultiStageStep {
    /// The pipeline tag an external `from_image` is imported under.
    pub fn from_image_tag(&self) -> Option<String> {
        self.from_image
            .as_ref()
            .map(|image| format!("{}-{}-{}", image.namespace, image.name, image.tag))
    }
}

/// A multi-stage test: ordered pre/test/post stages sharing a profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiStageTestConfiguration {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_profile: String,
    pub pre: Vec<MultiStageStep>,
    pub test: Vec<MultiStageStep>,
    pub post: Vec<MultiStageStep>,
    pub leases: Vec<StepLease>,
}

impl MultiStageTestConfiguration {
    /// All stages in execution order.
    pub fn stages(&self) -> impl Iterator<Item = &MultiStageStep> {
        self.pre.iter().chain(self.test.iter()).chain(self.post.iter())
    }
}

/// A single-container test run against a pipeline image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerTestConfiguration {
    /// Pipeline tag the test container runs from.
    pub from: String,
}

/// One test entry in the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfiguration {
    #[serde(rename = "as")]
    pub name: String,
    pub commands: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerTestConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multi_stage: Option<MultiStageTestConfiguration>,
    /// Names of secrets mounted into the test pod.
    pub secrets: Vec<String>,
    /// Deprecated single-secret form; folded into `secrets` by the planner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A release payload to resolve by querying the release endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<CandidateRelease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<OfficialRelease>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerelease: Option<PrereleaseRelease>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateRelease {
    pub product: String,
    pub architecture: String,
    pub stream: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficialRelease {
    pub channel: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrereleaseRelease {
    pub product: String,
    pub architecture: String,
    pub version_bounds: VersionBounds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionBounds {
    pub lower: String,
    pub upper: String,
}

/// Where promoted images are published.
///
/// Exactly one of `name` or `tag` determines the destination shape: with
/// `name` set, images land on `<namespace>/<name>:<component>`; otherwise on
/// `<namespace>/<component>:<tag>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfiguration {
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    pub excluded_images: Vec<String>,
    pub additional_images: BTreeMap<String, String>,
    pub disabled: bool,
}

// ---------------------------------------------------------------------------
// Step descriptors
// ---------------------------------------------------------------------------

/// Import an external image into the pipeline stream under a tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputImageTagStepConfiguration {
    pub base_image: ImageStreamTagReference,
    pub to: String,
}

/// Layer commands onto a pipeline image, caching the result under a new tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineImageCacheStepConfiguration {
    pub from: String,
    pub to: String,
    pub commands: String,
}

/// Clone the repository under test onto the build root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceStepConfiguration {
    pub from: String,
    pub to: String,
    pub cloner_image: ImageStreamTagReference,
    pub cloner_path: String,
}

/// Build the operator bundle source by applying substitutions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleSourceStepConfiguration {
    pub substitutions: Vec<PullSpecSubstitution>,
}

/// Generate the operator index dockerfile over the built bundles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexGeneratorStepConfiguration {
    pub to: String,
    pub operator_index: Vec<String>,
}

/// Inject built RPMs into a base image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmImageInjectionStepConfiguration {
    pub from: String,
    pub to: String,
}

/// Serve the built RPMs over HTTP inside the job namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RpmServeStepConfiguration {
    pub from: String,
}

/// Publish a pipeline tag into the stable output stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputImageTagStepConfiguration {
    pub from: String,
    pub to: ImageStreamTagReference,
    pub optional: bool,
}

/// A named release to resolve to a pull spec.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolvedReleaseStepConfiguration {
    pub name: String,
    #[serde(flatten)]
    pub release: ReleaseDescriptor,
}

/// Tagged-variant catalogue of raw step descriptors. Each variant owns its
/// configuration payload; the planner turns descriptors into runnable steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepConfiguration {
    InputImageTag(InputImageTagStepConfiguration),
    PipelineImageCache(PipelineImageCacheStepConfiguration),
    Source(SourceStepConfiguration),
    BundleSource(BundleSourceStepConfiguration),
    IndexGenerator(IndexGeneratorStepConfiguration),
    ProjectImageBuild(ProjectImageBuildConfiguration),
    GitSource(ProjectImageBuildInputs),
    RpmImageInjection(RpmImageInjectionStepConfiguration),
    RpmServe(RpmServeStepConfiguration),
    OutputImageTag(OutputImageTagStepConfiguration),
    ReleaseImagesTag(ReleaseTagConfiguration),
    ResolvedRelease(ResolvedReleaseStepConfiguration),
    Test(TestConfiguration),
}

/// The top-level declarative build configuration for one repository branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseBuildConfiguration {
    #[serde(flatten)]
    pub input: InputConfiguration,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub binary_build_commands: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub test_binary_build_commands: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rpm_build_commands: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rpm_build_location: String,
    pub resources: ResourceConfiguration,
    pub images: Vec<ProjectImageBuildConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<OperatorConfiguration>,
    pub tests: Vec<TestConfiguration>,
    pub releases: BTreeMap<String, ReleaseDescriptor>,
    pub raw_steps: Vec<StepConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion: Option<PromotionConfiguration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn istag_name_joins_name_and_tag() {
        let reference = ImageStreamTagReference {
            namespace: "ocp".to_string(),
            name: "builder".to_string(),
            tag: "golang-1.15".to_string(),
            alias: None,
        };
        assert_eq!(reference.istag_name(), "builder:golang-1.15");
        assert_eq!(reference.to_string(), "ocp/builder:golang-1.15");
    }

    #[test]
    fn resources_fall_back_to_wildcard() {
        let mut resources = ResourceConfiguration::new();
        resources.insert(
            "*".to_string(),
            ResourceRequirements {
                requests: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
                limits: BTreeMap::new(),
            },
        );
        resources.insert(
            "unit".to_string(),
            ResourceRequirements {
                requests: BTreeMap::from([("cpu".to_string(), "2".to_string())]),
                limits: BTreeMap::new(),
            },
        );

        assert_eq!(resources_for(&resources, "unit").requests["cpu"], "2");
        assert_eq!(resources_for(&resources, "e2e").requests["cpu"], "100m");
        assert!(resources_for(&BTreeMap::new(), "e2e").requests.is_empty());
    }

    #[test]
    fn from_image_tag_is_derived_from_the_reference() {
        let step = MultiStageStep {
            name: "ipi-install".to_string(),
            from_image: Some(ImageStreamTagReference {
                namespace: "ocp".to_string(),
                name: "installer".to_string(),
                tag: "latest".to_string(),
                alias: None,
            }),
            ..MultiStageStep::default()
        };
        assert_eq!(step.from_image_tag().as_deref(), Some("ocp-installer-latest"));
        assert_eq!(MultiStageStep::default().from_image_tag(), None);
    }

    #[test]
    fn configuration_round_trips_through_yaml() {
        let config = ReleaseBuildConfiguration {
            binary_build_commands: "make build".to_string(),
            images: vec![ProjectImageBuildConfiguration {
                to: "operator".to_string(),
                ..ProjectImageBuildConfiguration::default()
            }],
            promotion: Some(PromotionConfiguration {
                namespace: "ocp".to_string(),
                tag: "4.6".to_string(),
                ..PromotionConfiguration::default()
            }),
            ..ReleaseBuildConfiguration::default()
        };

        let raw = serde_yaml::to_string(&config).expect("serialize");
        let parsed: ReleaseBuildConfiguration = serde_yaml::from_str(&raw).expect("parse");
        assert_eq!(parsed.binary_build_commands, "make build");
        assert_eq!(parsed.images[0].to, "operator");
        assert_eq!(parsed.promotion.expect("promotion").tag, "4.6");
    }
}
