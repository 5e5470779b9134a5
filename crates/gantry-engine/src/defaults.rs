//! Interpret the declarative build configuration into runnable steps.
//!
//! `step_configs_for_build` expands the human-friendly configuration into an
//! ordered list of step descriptors; `from_config` turns descriptors into
//! step objects wired to clients, substitutes fully-qualified steps with
//! environment shims, and appends the promotion post-step when requested.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::info;

use gantry_api::{
    bundle_tag, pipeline_tag, release_image_env, stable_stream_name, static_supplier,
    DeferredParameters, ImageStreamTagReference, InputImageTagStepConfiguration, JobSpec,
    OutputImageTagStepConfiguration, ParameterMap, PipelineImageCacheStepConfiguration,
    ProjectImageBuildConfiguration, ProjectImageBuildInputs, ReleaseBuildConfiguration,
    ReleaseTagConfiguration, ResolvedReleaseStepConfiguration, RpmImageInjectionStepConfiguration,
    RpmServeStepConfiguration, SourceStepConfiguration, StepConfiguration, StepLease, StepLink,
    TestConfiguration, InRepoBuildRootConfiguration, BUILD_ROOT_CONFIG_FILE,
    DEFAULT_RPM_LOCATION, INITIAL_RELEASE, LATEST_RELEASE, RPM_SERVE_LOCATION,
    resources_for,
};
use gantry_cluster::{ClusterClient, Secret};

use crate::error::{EngineError, EngineResult};
use crate::release::payload::{AssembleReleaseStep, ImportReleaseStep};
use crate::release::promote::PromotionStep;
use crate::release::resolve::ReleaseResolver;
use crate::release::stable::{ReleaseImagesTagStep, StableImagesTagStep};
use crate::step::Step;
use crate::steps::bundle::{BundleSourceStep, IndexGeneratorStep};
use crate::steps::cache::PipelineImageCacheStep;
use crate::steps::env_shim::InputEnvironmentStep;
use crate::steps::images_ready::ImagesReadyStep;
use crate::steps::input_image::InputImageTagStep;
use crate::steps::lease::{LeaseClient, LeaseStep};
use crate::steps::output_image::OutputImageTagStep;
use crate::steps::project_image::ProjectDirectoryImageBuildStep;
use crate::steps::rpm::{RpmImageInjectionStep, RpmServeStep};
use crate::steps::source::{GitSourceStep, SourceStep};
use crate::steps::test::{MultiStageTestStep, Template, TemplateExecutionStep, TestStep};
use crate::steps::write_params::WriteParametersStep;

/// Environment variable a leased resource is exposed under by default.
pub const DEFAULT_LEASE_ENV: &str = "LEASED_RESOURCE";

/// Clients and ambient inputs the planner wires into steps.
pub struct StepFactoryContext {
    /// Client for the primary build cluster.
    pub client: Arc<dyn ClusterClient>,
    /// Destination client for promotion; defaults to the build cluster.
    pub dst_client: Option<Arc<dyn ClusterClient>>,
    /// Client for the cluster hosting the promotion target namespace.
    pub image_creator_client: Option<Arc<dyn ClusterClient>>,
    pub lease_client: Option<Arc<dyn LeaseClient>>,
    pub resolver: Arc<ReleaseResolver>,
    pub job_spec: Arc<JobSpec>,
    /// Public hostname of the central registry, used for mirror targets and
    /// assembled payload pull specs.
    pub registry_host: String,
    /// Directory test artifacts are gathered into, exposed as `ARTIFACTS`.
    pub artifact_dir: Option<String>,
    pub push_secret: Option<Secret>,
}

/// The planner's output: the build graph and terminal post-steps.
pub struct PlannedSteps {
    pub steps: Vec<Arc<dyn Step>>,
    pub post_steps: Vec<Arc<dyn Step>>,
}

/// Reader for in-repository configuration files.
pub type ReadFile<'a> = &'a dyn Fn(&str) -> std::io::Result<Vec<u8>>;

/// Interpret the configuration and generate the full set of steps required
/// for the build: defaulted steps, generated steps, and raw user steps.
#[allow(clippy::too_many_arguments)]
pub async fn from_config(
    config: &ReleaseBuildConfiguration,
    ctx: &StepFactoryContext,
    params: Arc<DeferredParameters>,
    templates: &[Template],
    param_file: Option<&str>,
    promote: bool,
    required_targets: &[String],
    read_file: ReadFile<'_>,
) -> EngineResult<PlannedSteps> {
    let required_names: HashSet<String> = required_targets.iter().cloned().collect();

    let job_spec = Arc::clone(&ctx.job_spec);
    params.add("JOB_NAME", static_supplier(job_spec.job.clone()));
    params.add("JOB_NAME_HASH", static_supplier(job_spec.job_name_hash()));
    params.add("JOB_NAME_SAFE", static_supplier(job_spec.job_name_safe()));
    params.add("NAMESPACE", static_supplier(job_spec.namespace.clone()));
    if let Some(artifact_dir) = &ctx.artifact_dir {
        params.add("ARTIFACTS", static_supplier(artifact_dir.clone()));
    }

    let mut overridable_steps: Vec<Arc<dyn Step>> = Vec::new();
    let mut build_steps: Vec<Arc<dyn Step>> = Vec::new();
    let mut post_steps: Vec<Arc<dyn Step>> = Vec::new();
    let mut image_step_links: Vec<StepLink> = Vec::new();
    let mut has_release_step = false;

    let raw_steps = step_configs_for_build(config, &ctx.job_spec, read_file)?;
    for raw_step in raw_steps {
        match raw_step {
            StepConfiguration::Test(test) => {
                let steps = step_for_test(config, ctx, &params, &test)?;
                build_steps.extend(steps);
                continue;
            }
            StepConfiguration::ResolvedRelease(resolve_config) => {
                // The release step must stay in the graph so it can be
                // addressed with --target, even when the pull spec comes in
                // through the environment.
                has_release_step = true;
                let env = release_image_env(&resolve_config.name);
                let value = if params.has_input(&env) {
                    let value = params.get(&env).map_err(|err| {
                        EngineError::for_reason("resolving_release", err)
                    })?;
                    info!(release = %resolve_config.name, pull_spec = %value, "using explicitly provided pull-spec");
                    value
                } else {
                    let value = ctx
                        .resolver
                        .resolve(&resolve_config.name, &resolve_config.release)
                        .await
                        .map_err(|err| EngineError::for_reason("resolving_release", err))?;
                    info!(release = %resolve_config.name, pull_spec = %value, "resolved release");
                    value
                };
                let step: Arc<dyn Step> = Arc::new(ImportReleaseStep::new(
                    resolve_config.name.clone(),
                    value,
                    Arc::clone(&ctx.client),
                    Arc::clone(&job_spec),
                ));
                add_provides_for_step(step.as_ref(), &params);
                build_steps.push(step);
                continue;
            }
            StepConfiguration::ReleaseImagesTag(tag_config) => {
                let step: Arc<dyn Step> = Arc::new(ReleaseImagesTagStep::new(
                    tag_config.clone(),
                    Arc::clone(&ctx.client),
                    Arc::clone(&job_spec),
                ));
                let step_links = step.creates();

                has_release_step = true;

                // The user may still override `initial` and `latest` with an
                // explicit pull spec; otherwise both payloads are assembled
                // from the stable stream.
                for name in [INITIAL_RELEASE, LATEST_RELEASE] {
                    let env = release_image_env(name);
                    let release_step: Arc<dyn Step> = if params.has_input(&env) {
                        let pull_spec = params.get(&env).map_err(|err| {
                            EngineError::for_reason("reading_release", err)
                        })?;
                        info!(release = name, pull_spec = %pull_spec, "resolved release");
                        Arc::new(ImportReleaseStep::new(
                            name,
                            pull_spec,
                            Arc::clone(&ctx.client),
                            Arc::clone(&job_spec),
                        ))
                    } else {
                        Arc::new(AssembleReleaseStep::new(
                            name,
                            tag_config.clone(),
                            ctx.registry_host.clone(),
                            Arc::clone(&ctx.client),
                            Arc::clone(&job_spec),
                        ))
                    };
                    add_provides_for_step(release_step.as_ref(), &params);
                    overridable_steps.push(release_step);
                }

                let (step, substituted) = check_for_fully_qualified_step(step, &params);
                if substituted {
                    info!(step = %step.name(), "task is satisfied by environment variables and will be skipped");
                } else {
                    image_step_links.extend(step_links);
                }
                overridable_steps.push(step);
                continue;
            }
            other => {
                let (step, step_links) = build_step_for(other, config, ctx, &job_spec, &required_names)?;
                let (step, substituted) = check_for_fully_qualified_step(step, &params);
                if substituted {
                    info!(step = %step.name(), "task is satisfied by environment variables and will be skipped");
                } else {
                    image_step_links.extend(step_links);
                }
                overridable_steps.push(step);
            }
        }
    }

    for template in templates {
        let mut step: Arc<dyn Step> = Arc::new(TemplateExecutionStep::new(
            template.clone(),
            Arc::clone(&params),
            Arc::clone(&ctx.client),
            Arc::clone(&job_spec),
        ));
        let has_cluster_type = template.parameters.iter().any(|p| p.name == "CLUSTER_TYPE");
        let has_use_lease = template
            .parameters
            .iter()
            .any(|p| p.name == "USE_LEASE_CLIENT");
        if has_cluster_type && has_use_lease {
            let cluster_type = params.get("CLUSTER_TYPE")?;
            let lease_type = lease_type_from_cluster_type(&cluster_type)?;
            let lease_client = ctx.lease_client.as_ref().ok_or_else(|| {
                EngineError::InvalidConfiguration(
                    "template requires a lease but no lease client is configured".to_string(),
                )
            })?;
            step = Arc::new(LeaseStep::new(
                Arc::clone(lease_client),
                vec![StepLease {
                    resource_type: lease_type,
                    env: DEFAULT_LEASE_ENV.to_string(),
                    count: 1,
                }],
                step,
            ));
        }
        add_provides_for_step(step.as_ref(), &params);
        build_steps.push(step);
    }

    if let Some(path) = param_file {
        let step: Arc<dyn Step> = Arc::new(WriteParametersStep::new(Arc::clone(&params), path));
        add_provides_for_step(step.as_ref(), &params);
        build_steps.push(step);
    }

    if !has_release_step {
        let step: Arc<dyn Step> = Arc::new(StableImagesTagStep::new(
            Arc::clone(&ctx.client),
            Arc::clone(&job_spec),
        ));
        add_provides_for_step(step.as_ref(), &params);
        build_steps.push(step);
    }

    let step: Arc<dyn Step> = Arc::new(ImagesReadyStep::new(image_step_links));
    add_provides_for_step(step.as_ref(), &params);
    build_steps.push(step);

    if promote {
        let promotion_config = config.promotion.clone().ok_or_else(|| {
            EngineError::InvalidConfiguration(
                "cannot promote images, no promotion configuration defined".to_string(),
            )
        })?;
        post_steps.push(Arc::new(PromotionStep::new(
            promotion_config,
            config.images.clone(),
            required_names,
            Arc::clone(&ctx.client),
            ctx.dst_client.clone().unwrap_or_else(|| Arc::clone(&ctx.client)),
            Arc::clone(&job_spec),
            ctx.push_secret.clone(),
            ctx.image_creator_client.clone(),
            ctx.registry_host.clone(),
        )) as Arc<dyn Step>);
    }

    let mut steps = overridable_steps;
    steps.extend(build_steps);
    Ok(PlannedSteps { steps, post_steps })
}

/// Build the step object for a non-test, non-release descriptor. Returns the
/// step plus the links it contributes to the published-image set.
fn build_step_for(
    raw_step: StepConfiguration,
    config: &ReleaseBuildConfiguration,
    ctx: &StepFactoryContext,
    job_spec: &Arc<JobSpec>,
    required_names: &HashSet<String>,
) -> EngineResult<(Arc<dyn Step>, Vec<StepLink>)> {
    let client = Arc::clone(&ctx.client);
    let mut step_links = Vec::new();
    let step: Arc<dyn Step> = match raw_step {
        StepConfiguration::InputImageTag(c) => {
            Arc::new(InputImageTagStep::new(c, client, Arc::clone(job_spec)))
        }
        StepConfiguration::PipelineImageCache(c) => {
            let resources = resources_for(&config.resources, &c.to);
            Arc::new(PipelineImageCacheStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::Source(c) => {
            let resources = resources_for(&config.resources, &c.to);
            Arc::new(SourceStep::new(c, resources, client, Arc::clone(job_spec)))
        }
        StepConfiguration::BundleSource(c) => {
            let resources = resources_for(&config.resources, pipeline_tag::BUNDLE_SOURCE);
            Arc::new(BundleSourceStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::IndexGenerator(c) => {
            let resources = resources_for(&config.resources, &c.to);
            Arc::new(IndexGeneratorStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::ProjectImageBuild(c) => {
            let resources = resources_for(&config.resources, &c.to);
            Arc::new(ProjectDirectoryImageBuildStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::GitSource(c) => {
            let resources = resources_for(&config.resources, pipeline_tag::ROOT);
            Arc::new(GitSourceStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::RpmImageInjection(c) => {
            let resources = resources_for(&config.resources, &c.to);
            Arc::new(RpmImageInjectionStep::new(
                c,
                resources,
                client,
                Arc::clone(job_spec),
            ))
        }
        StepConfiguration::RpmServe(c) => {
            Arc::new(RpmServeStep::new(c, client, Arc::clone(job_spec)))
        }
        StepConfiguration::OutputImageTag(c) => {
            let include = required_names.contains(&c.from) || !c.optional;
            let step = Arc::new(OutputImageTagStep::new(
                c,
                client,
                Arc::clone(job_spec),
            ));
            // Required or non-optional output images are part of [images].
            if include {
                step_links.extend(step.creates());
            }
            step
        }
        StepConfiguration::Test(_)
        | StepConfiguration::ResolvedRelease(_)
        | StepConfiguration::ReleaseImagesTag(_) => {
            unreachable!("handled by the caller")
        }
    };
    Ok((step, step_links))
}

/// Create the appropriate step for a test entry. Multi-stage tests with
/// leases get a private parameter layer so their `Provides` values cannot
/// conflict with other tests before pruning.
fn step_for_test(
    config: &ReleaseBuildConfiguration,
    ctx: &StepFactoryContext,
    params: &Arc<DeferredParameters>,
    test: &TestConfiguration,
) -> EngineResult<Vec<Arc<dyn Step>>> {
    if let Some(multi_stage) = &test.multi_stage {
        let leases = leases_for_test(multi_stage);
        let test_params = if leases.is_empty() {
            Arc::clone(params)
        } else {
            Arc::new(DeferredParameters::chained(Arc::clone(params)))
        };
        let mut step: Arc<dyn Step> = Arc::new(MultiStageTestStep::new(
            test.clone(),
            Arc::clone(&test_params),
            Arc::clone(&ctx.client),
            Arc::clone(&ctx.job_spec),
        ));
        if !leases.is_empty() {
            let lease_client = ctx.lease_client.as_ref().ok_or_else(|| {
                EngineError::InvalidConfiguration(format!(
                    "test {} requires leases but no lease client is configured",
                    test.name
                ))
            })?;
            step = Arc::new(LeaseStep::new(Arc::clone(lease_client), leases, step));
            add_provides_for_step(step.as_ref(), &test_params);
        }

        let mut steps = vec![step];
        // Import any external stage images into the pipeline first.
        for stage in multi_stage.stages() {
            if let (Some(image), Some(tag)) = (&stage.from_image, stage.from_image_tag()) {
                steps.push(Arc::new(InputImageTagStep::new(
                    InputImageTagStepConfiguration {
                        base_image: image.clone(),
                        to: tag,
                    },
                    Arc::clone(&ctx.client),
                    Arc::clone(&ctx.job_spec),
                )) as Arc<dyn Step>);
            }
        }
        return Ok(steps);
    }

    let resources = resources_for(&config.resources, &test.name);
    Ok(vec![Arc::new(TestStep::new(
        test.clone(),
        resources,
        Arc::clone(&ctx.client),
        Arc::clone(&ctx.job_spec),
    ))])
}

/// Aggregate all lease configurations a multi-stage test carries.
fn leases_for_test(test: &gantry_api::MultiStageTestConfiguration) -> Vec<StepLease> {
    let mut leases = Vec::new();
    if !test.cluster_profile.is_empty() {
        leases.push(StepLease {
            resource_type: format!("{}-quota-slice", test.cluster_profile),
            env: DEFAULT_LEASE_ENV.to_string(),
            count: 1,
        });
    }
    for stage in test.stages() {
        leases.extend(stage.leases.iter().cloned());
    }
    leases.extend(test.leases.iter().cloned());
    leases
}

/// Map a cluster type to the lease resource type guarding its quota.
pub fn lease_type_from_cluster_type(cluster_type: &str) -> EngineResult<String> {
    match cluster_type {
        "aws" | "gcp" | "azure4" | "openstack" | "vsphere" | "ovirt" | "metal" | "libvirt" => {
            Ok(format!("{cluster_type}-quota-slice"))
        }
        other => Err(EngineError::InvalidConfiguration(format!(
            "cannot resolve lease type from cluster type {other}"
        ))),
    }
}

/// Register a step's provided parameters with the store. Use this when a
/// step may still need to run even if all parameters are provided by the
/// caller as environment variables.
fn add_provides_for_step(step: &dyn Step, params: &DeferredParameters) {
    for (name, supplier) in step.provides() {
        params.add(name, supplier);
    }
}

/// If every output parameter of the step is present in the environment,
/// replace the step with a shim that publishes those values. The parameter
/// store is only mutated once the substitution is committed.
fn check_for_fully_qualified_step(
    step: Arc<dyn Step>,
    params: &DeferredParameters,
) -> (Arc<dyn Step>, bool) {
    if !step.exempt_from_input_substitution() {
        if let Some(values) = environment_values_for(params, &step.provides()) {
            let shim: Arc<dyn Step> = Arc::new(InputEnvironmentStep::new(
                step.name(),
                values.clone(),
                step.creates(),
            ));
            params.set_all(&values);
            return (shim, true);
        }
    }
    for (name, supplier) in step.provides() {
        params.add(name, supplier);
    }
    (step, false)
}

/// Snapshot the environment values for all given parameters, or `None` when
/// any of them is missing.
fn environment_values_for(
    params: &DeferredParameters,
    provides: &ParameterMap,
) -> Option<BTreeMap<String, String>> {
    if provides.is_empty() {
        return None;
    }
    let mut values = BTreeMap::new();
    for name in provides.keys() {
        if !params.has_input(name) {
            return None;
        }
        values.insert(name.clone(), params.get(name).ok()?);
    }
    Some(values)
}

/// Expand the configuration into an ordered list of step descriptors.
pub fn step_configs_for_build(
    config: &ReleaseBuildConfiguration,
    job_spec: &JobSpec,
    read_file: ReadFile<'_>,
) -> EngineResult<Vec<StepConfiguration>> {
    let mut steps = Vec::new();

    // Normalize aliases so each entry's alias equals its map key.
    let mut base_images = config.input.base_images.clone();
    for (alias, target) in base_images.iter_mut() {
        target.alias = Some(alias.clone());
    }
    let mut base_rpm_images = config.input.base_rpm_images.clone();
    for (alias, target) in base_rpm_images.iter_mut() {
        target.alias = Some(alias.clone());
    }

    if let Some(build_root) = &config.input.build_root {
        let mut image_stream_tag = build_root.image_stream_tag.clone();
        if build_root.from_repository {
            image_stream_tag = Some(build_root_from_repository(read_file)?);
        }
        if let Some(tag_ref) = image_stream_tag {
            steps.push(build_root_step(tag_ref, job_spec));
        } else if let Some(project_image) = &build_root.project_image {
            steps.push(StepConfiguration::GitSource(ProjectImageBuildInputs {
                dockerfile_path: project_image.dockerfile_path.clone(),
                context_dir: project_image.context_dir.clone(),
            }));
        }
    }

    if job_spec.refs.is_some() || !job_spec.extra_refs.is_empty() {
        steps.push(StepConfiguration::Source(SourceStepConfiguration {
            from: pipeline_tag::ROOT.to_string(),
            to: pipeline_tag::SOURCE.to_string(),
            cloner_image: ImageStreamTagReference {
                namespace: "ci".to_string(),
                name: "managed-clonerefs".to_string(),
                tag: "latest".to_string(),
                alias: None,
            },
            cloner_path: "/clonerefs".to_string(),
        }));
    }

    if !config.binary_build_commands.is_empty() {
        steps.push(StepConfiguration::PipelineImageCache(
            PipelineImageCacheStepConfiguration {
                from: pipeline_tag::SOURCE.to_string(),
                to: pipeline_tag::BINARIES.to_string(),
                commands: config.binary_build_commands.clone(),
            },
        ));
    }

    if !config.test_binary_build_commands.is_empty() {
        steps.push(StepConfiguration::PipelineImageCache(
            PipelineImageCacheStepConfiguration {
                from: pipeline_tag::SOURCE.to_string(),
                to: pipeline_tag::TEST_BINARIES.to_string(),
                commands: config.test_binary_build_commands.clone(),
            },
        ));
    }

    if !config.rpm_build_commands.is_empty() {
        let from = if config.binary_build_commands.is_empty() {
            pipeline_tag::SOURCE
        } else {
            pipeline_tag::BINARIES
        };
        let out = if config.rpm_build_location.is_empty() {
            DEFAULT_RPM_LOCATION
        } else {
            &config.rpm_build_location
        };
        steps.push(StepConfiguration::PipelineImageCache(
            PipelineImageCacheStepConfiguration {
                from: from.to_string(),
                to: pipeline_tag::RPMS.to_string(),
                commands: format!(
                    "{}; ln -s $( pwd )/{out} {RPM_SERVE_LOCATION}",
                    config.rpm_build_commands
                ),
            },
        ));
        steps.push(StepConfiguration::RpmServe(RpmServeStepConfiguration {
            from: pipeline_tag::RPMS.to_string(),
        }));
    }

    for (alias, base_image) in &base_images {
        steps.push(StepConfiguration::InputImageTag(
            InputImageTagStepConfiguration {
                base_image: default_image_from_release_tag(
                    base_image.clone(),
                    config.input.release_tag_configuration.as_ref(),
                ),
                to: alias.clone(),
            },
        ));
    }

    for (alias, target) in &base_rpm_images {
        let intermediate = format!("{alias}-without-rpms");
        steps.push(StepConfiguration::InputImageTag(
            InputImageTagStepConfiguration {
                base_image: default_image_from_release_tag(
                    target.clone(),
                    config.input.release_tag_configuration.as_ref(),
                ),
                to: intermediate.clone(),
            },
        ));
        steps.push(StepConfiguration::RpmImageInjection(
            RpmImageInjectionStepConfiguration {
                from: intermediate,
                to: alias.clone(),
            },
        ));
    }

    let output_stream = stable_stream_name(
        config
            .input
            .release_tag_configuration
            .as_ref()
            .map(|c| c.name_prefix.as_str()),
    );
    for image in &config.images {
        steps.push(StepConfiguration::ProjectImageBuild(image.clone()));
        steps.push(StepConfiguration::OutputImageTag(
            OutputImageTagStepConfiguration {
                from: image.to.clone(),
                to: ImageStreamTagReference {
                    name: output_stream.clone(),
                    tag: image.to.clone(),
                    ..ImageStreamTagReference::default()
                },
                optional: image.optional,
            },
        ));
    }

    if let Some(operator) = &config.operator {
        steps.push(StepConfiguration::BundleSource(
            gantry_api::BundleSourceStepConfiguration {
                substitutions: operator.substitutions.clone(),
            },
        ));
        let mut bundles = Vec::new();
        for (index, bundle) in operator.bundles.iter().enumerate() {
            let bundle_name = bundle_tag(index);
            bundles.push(bundle_name.clone());
            steps.push(StepConfiguration::ProjectImageBuild(
                ProjectImageBuildConfiguration {
                    to: bundle_name,
                    inputs: ProjectImageBuildInputs {
                        context_dir: bundle.context_dir.clone(),
                        dockerfile_path: bundle.dockerfile_path.clone(),
                    },
                    optional: false,
                },
            ));
        }
        steps.push(StepConfiguration::IndexGenerator(
            gantry_api::IndexGeneratorStepConfiguration {
                to: pipeline_tag::INDEX_GENERATOR.to_string(),
                operator_index: bundles,
            },
        ));
        steps.push(StepConfiguration::ProjectImageBuild(
            ProjectImageBuildConfiguration {
                to: pipeline_tag::INDEX.to_string(),
                inputs: ProjectImageBuildInputs {
                    dockerfile_path: "index.Dockerfile".to_string(),
                    context_dir: String::new(),
                },
                optional: false,
            },
        ));
    }

    for test in &config.tests {
        if test.container.is_some() || test.multi_stage.is_some() {
            let mut test = test.clone();
            if let Some(secret) = test.secret.take() {
                test.secrets.push(secret);
            }
            steps.push(StepConfiguration::Test(test));
        }
    }

    if let Some(tag_config) = &config.input.release_tag_configuration {
        steps.push(StepConfiguration::ReleaseImagesTag(tag_config.clone()));
    }
    for (name, descriptor) in &config.releases {
        steps.push(StepConfiguration::ResolvedRelease(
            ResolvedReleaseStepConfiguration {
                name: name.clone(),
                release: descriptor.clone(),
            },
        ));
    }

    steps.extend(config.raw_steps.iter().cloned());

    Ok(steps)
}

fn build_root_step(mut target: ImageStreamTagReference, job_spec: &JobSpec) -> StepConfiguration {
    if target.namespace.is_empty() {
        target.namespace = job_spec.base_namespace.clone();
    }
    if target.name.is_empty() {
        target.name = match &job_spec.refs {
            Some(refs) => format!("{}-test-base", refs.repo),
            None => "test-base".to_string(),
        };
    }
    StepConfiguration::InputImageTag(InputImageTagStepConfiguration {
        base_image: target,
        to: pipeline_tag::ROOT.to_string(),
    })
}

/// Base images given as a bare tag default their namespace and name from the
/// release-tag configuration.
fn default_image_from_release_tag(
    mut base: ImageStreamTagReference,
    release: Option<&ReleaseTagConfiguration>,
) -> ImageStreamTagReference {
    let Some(release) = release else {
        return base;
    };
    if base.tag.is_empty() || !base.name.is_empty() || !base.namespace.is_empty() {
        return base;
    }
    base.name = release.name.clone();
    base.namespace = release.namespace.clone();
    base
}

fn build_root_from_repository(read_file: ReadFile<'_>) -> EngineResult<ImageStreamTagReference> {
    let data = read_file(BUILD_ROOT_CONFIG_FILE).map_err(|err| {
        EngineError::InvalidConfiguration(format!(
            "failed to read {BUILD_ROOT_CONFIG_FILE}: {err}"
        ))
    })?;
    let config: InRepoBuildRootConfiguration = serde_yaml::from_slice(&data).map_err(|err| {
        EngineError::InvalidConfiguration(format!(
            "failed to parse {BUILD_ROOT_CONFIG_FILE}: {err}"
        ))
    })?;
    Ok(config.build_root_image)
}
