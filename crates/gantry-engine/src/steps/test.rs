//! Test execution: container tests, multi-stage tests and templates.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use gantry_api::{
    DeferredParameters, JobSpec, MultiStageStep, ResourceRequirements, StepLink,
    TestConfiguration, STABLE_IMAGE_STREAM,
};
use gantry_cluster::{
    ClusterClient, Container, EnvVar, ObjectMeta, Pod, PodSpec, RestartPolicy, Volume, VolumeMount,
    VolumeSource,
};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Directory test pods expose their artifacts in.
pub const ARTIFACTS_PATH: &str = "/tmp/artifacts";

fn artifacts_mount() -> (Volume, VolumeMount) {
    (
        Volume {
            name: "artifacts".to_string(),
            source: VolumeSource::EmptyDir,
        },
        VolumeMount {
            name: "artifacts".to_string(),
            mount_path: ARTIFACTS_PATH.to_string(),
            read_only: false,
        },
    )
}

fn secret_volumes(secrets: &[String]) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    for secret in secrets {
        volumes.push(Volume {
            name: secret.clone(),
            source: VolumeSource::Secret {
                secret_name: secret.clone(),
            },
        });
        mounts.push(VolumeMount {
            name: secret.clone(),
            mount_path: format!("/usr/local/{secret}"),
            read_only: true,
        });
    }
    (volumes, mounts)
}

/// Link a multi-stage `from` reference resolves to: either a tag in the
/// stable stream (`stable:cli`) or a pipeline tag.
fn link_for_from(from: &str) -> StepLink {
    match from.split_once(':') {
        Some((stream, tag)) if stream == STABLE_IMAGE_STREAM || stream.ends_with("stable") => {
            StepLink::StableImage {
                stream: stream.to_string(),
                tag: tag.to_string(),
            }
        }
        _ => StepLink::PipelineImage(from.to_string()),
    }
}

/// Runs a single-container test from a pipeline image.
pub struct TestStep {
    config: TestConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl TestStep {
    pub fn new(
        config: TestConfiguration,
        resources: ResourceRequirements,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            resources,
            client,
            job_spec,
        }
    }

    fn from_tag(&self) -> String {
        self.config
            .container
            .as_ref()
            .map(|c| c.from.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Step for TestStep {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        format!("Run test {}", self.config.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.from_tag())]
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.container.is_none() {
            return Err(EngineError::InvalidConfiguration(format!(
                "test {} has no container configuration",
                self.config.name
            )));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let (artifact_volume, artifact_mount) = artifacts_mount();
        let (mut volumes, mut mounts) = secret_volumes(&self.config.secrets);
        volumes.push(artifact_volume);
        mounts.push(artifact_mount);

        let pod = Pod {
            meta: ObjectMeta::named(self.job_spec.namespace.clone(), self.config.name.clone()),
            spec: PodSpec {
                restart_policy: RestartPolicy::Never,
                containers: vec![Container {
                    name: "test".to_string(),
                    image: format!("pipeline:{}", self.from_tag()),
                    command: vec!["/bin/sh".to_string(), "-c".to_string()],
                    args: vec![self.config.commands.clone()],
                    env: vec![EnvVar {
                        name: "ARTIFACT_DIR".to_string(),
                        value: ARTIFACTS_PATH.to_string(),
                    }],
                    volume_mounts: mounts,
                    requests: self.resources.requests.clone(),
                    limits: self.resources.limits.clone(),
                }],
                volumes,
                ..PodSpec::default()
            },
        };
        self.client.run_pod(&pod).await?;
        Ok(())
    }
}

/// Runs the pre/test/post stages of a multi-stage test sequentially.
///
/// Pre and test stages fail fast; post stages always run so that teardown
/// happens even after a failure. The first error wins.
pub struct MultiStageTestStep {
    config: TestConfiguration,
    params: Arc<DeferredParameters>,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl MultiStageTestStep {
    pub fn new(
        config: TestConfiguration,
        params: Arc<DeferredParameters>,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            params,
            client,
            job_spec,
        }
    }

    fn stages(&self) -> (Vec<MultiStageStep>, Vec<MultiStageStep>, Vec<MultiStageStep>) {
        match &self.config.multi_stage {
            Some(ms) => (ms.pre.clone(), ms.test.clone(), ms.post.clone()),
            None => (Vec::new(), Vec::new(), Vec::new()),
        }
    }

    async fn run_stage(&self, ctx: &StepContext, stage: &MultiStageStep) -> EngineResult<()> {
        ctx.ensure_active()?;
        let image = if let Some(tag) = stage.from_image_tag() {
            format!("pipeline:{tag}")
        } else if let Some(from) = &stage.from {
            match link_for_from(from) {
                StepLink::StableImage { stream, tag } => format!("{stream}:{tag}"),
                _ => format!("pipeline:{from}"),
            }
        } else {
            return Err(EngineError::InvalidConfiguration(format!(
                "stage {} of test {} has no image",
                stage.name, self.config.name
            )));
        };

        let mut env = vec![EnvVar {
            name: "ARTIFACT_DIR".to_string(),
            value: ARTIFACTS_PATH.to_string(),
        }];
        for lease in &stage.leases {
            if lease.env.is_empty() {
                continue;
            }
            let value = self.params.get(&lease.env)?;
            env.push(EnvVar {
                name: lease.env.clone(),
                value,
            });
        }

        let (artifact_volume, artifact_mount) = artifacts_mount();
        let pod = Pod {
            meta: ObjectMeta::named(
                self.job_spec.namespace.clone(),
                format!("{}-{}", self.config.name, stage.name),
            ),
            spec: PodSpec {
                restart_policy: RestartPolicy::Never,
                containers: vec![Container {
                    name: "test".to_string(),
                    image,
                    command: vec!["/bin/sh".to_string(), "-c".to_string()],
                    args: vec![stage.commands.clone()],
                    env,
                    volume_mounts: vec![artifact_mount],
                    ..Container::default()
                }],
                volumes: vec![artifact_volume],
                ..PodSpec::default()
            },
        };
        self.client.run_pod(&pod).await?;
        Ok(())
    }
}

#[async_trait]
impl Step for MultiStageTestStep {
    fn name(&self) -> String {
        self.config.name.clone()
    }

    fn description(&self) -> String {
        format!("Run multi-stage test {}", self.config.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        let mut links = Vec::new();
        if let Some(ms) = &self.config.multi_stage {
            for stage in ms.stages() {
                if let Some(tag) = stage.from_image_tag() {
                    links.push(StepLink::PipelineImage(tag));
                } else if let Some(from) = &stage.from {
                    links.push(link_for_from(from));
                }
            }
        }
        links
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn validate(&self) -> EngineResult<()> {
        if self.config.multi_stage.is_none() {
            return Err(EngineError::InvalidConfiguration(format!(
                "test {} has no multi-stage configuration",
                self.config.name
            )));
        }
        Ok(())
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        let (pre, test, post) = self.stages();

        let mut first_error: Option<EngineError> = None;
        'work: for stage in pre.iter().chain(test.iter()) {
            if let Err(err) = self.run_stage(ctx, stage).await {
                first_error = Some(err);
                break 'work;
            }
        }

        // Teardown always runs, even after failure or cancellation.
        for stage in &post {
            if let Err(err) = self.run_stage(&StepContext::new(), stage).await {
                tracing::warn!(
                    test = %self.config.name,
                    stage = %stage.name,
                    error = %err,
                    "post stage failed"
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// A parameterized pod template, instantiated by substituting resolved
/// parameter values into the pod specs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Template {
    pub name: String,
    pub parameters: Vec<TemplateParameter>,
    pub pods: Vec<Pod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateParameter {
    pub name: String,
    pub required: bool,
}

/// Resolves template parameters from the store and runs each pod in order.
pub struct TemplateExecutionStep {
    template: Template,
    params: Arc<DeferredParameters>,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl TemplateExecutionStep {
    pub fn new(
        template: Template,
        params: Arc<DeferredParameters>,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            template,
            params,
            client,
            job_spec,
        }
    }

    fn resolve_parameters(&self) -> EngineResult<BTreeMap<String, String>> {
        let mut values = BTreeMap::new();
        for parameter in &self.template.parameters {
            match self.params.get(&parameter.name) {
                Ok(value) => {
                    values.insert(parameter.name.clone(), value);
                }
                Err(err) if parameter.required => return Err(err.into()),
                Err(_) => {}
            }
        }
        Ok(values)
    }
}

fn substitute(input: &str, values: &BTreeMap<String, String>) -> String {
    let mut output = input.to_string();
    for (name, value) in values {
        output = output.replace(&format!("${{{name}}}"), value);
    }
    output
}

#[async_trait]
impl Step for TemplateExecutionStep {
    fn name(&self) -> String {
        self.template.name.clone()
    }

    fn description(&self) -> String {
        format!("Run template {}", self.template.name)
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let values = self.resolve_parameters()?;
        for pod in &self.template.pods {
            ctx.ensure_active()?;
            let mut instantiated = pod.clone();
            instantiated.meta.namespace = self.job_spec.namespace.clone();
            for container in &mut instantiated.spec.containers {
                container.args = container
                    .args
                    .iter()
                    .map(|arg| substitute(arg, &values))
                    .collect();
                for env in &mut container.env {
                    env.value = substitute(&env.value, &values);
                }
            }
            self.client.run_pod(&instantiated).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_api::{ContainerTestConfiguration, MultiStageTestConfiguration};
    use gantry_cluster::fakes::FakeCluster;

    fn job_spec() -> Arc<JobSpec> {
        Arc::new(JobSpec {
            namespace: "ci-op-1234".to_string(),
            ..JobSpec::default()
        })
    }

    fn stage(name: &str, from: &str) -> MultiStageStep {
        MultiStageStep {
            name: name.to_string(),
            from: Some(from.to_string()),
            commands: format!("run-{name}"),
            ..MultiStageStep::default()
        }
    }

    #[tokio::test]
    async fn container_test_runs_one_pod() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        let step = TestStep::new(
            TestConfiguration {
                name: "unit".to_string(),
                commands: "make test".to_string(),
                container: Some(ContainerTestConfiguration {
                    from: "src".to_string(),
                }),
                ..TestConfiguration::default()
            },
            ResourceRequirements::default(),
            cluster.clone(),
            job_spec(),
        );

        step.validate().unwrap();
        step.run(&StepContext::new()).await.unwrap();

        let pods = cluster.submitted_pods();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].meta.name, "unit");
        assert_eq!(pods[0].spec.restart_policy, RestartPolicy::Never);
        assert_eq!(pods[0].spec.containers[0].args, vec!["make test"]);
    }

    #[tokio::test]
    async fn multi_stage_runs_post_after_failure() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        cluster.fail_pod("e2e-install");
        let step = MultiStageTestStep::new(
            TestConfiguration {
                name: "e2e".to_string(),
                multi_stage: Some(MultiStageTestConfiguration {
                    pre: vec![stage("install", "src")],
                    test: vec![stage("run", "src")],
                    post: vec![stage("teardown", "src")],
                    ..MultiStageTestConfiguration::default()
                }),
                ..TestConfiguration::default()
            },
            Arc::new(DeferredParameters::new(BTreeMap::new())),
            cluster.clone(),
            job_spec(),
        );

        assert!(step.run(&StepContext::new()).await.is_err());

        let names: Vec<String> = cluster
            .submitted_pods()
            .iter()
            .map(|p| p.meta.name.clone())
            .collect();
        // install failed, run was skipped, teardown still happened.
        assert_eq!(names, vec!["e2e-install", "e2e-teardown"]);
    }

    #[test]
    fn multi_stage_requires_stable_and_pipeline_links() {
        let step = MultiStageTestStep::new(
            TestConfiguration {
                name: "e2e".to_string(),
                multi_stage: Some(MultiStageTestConfiguration {
                    test: vec![stage("run", "stable:cli"), stage("verify", "bin")],
                    ..MultiStageTestConfiguration::default()
                }),
                ..TestConfiguration::default()
            },
            Arc::new(DeferredParameters::new(BTreeMap::new())),
            Arc::new(FakeCluster::new("build01")),
            job_spec(),
        );

        let requires = step.requires();
        assert!(requires.contains(&StepLink::StableImage {
            stream: "stable".to_string(),
            tag: "cli".to_string(),
        }));
        assert!(requires.contains(&StepLink::PipelineImage("bin".to_string())));
    }

    #[tokio::test]
    async fn template_substitutes_resolved_parameters() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        let params = Arc::new(DeferredParameters::new(BTreeMap::from([(
            "CLUSTER_TYPE".to_string(),
            "aws".to_string(),
        )])));
        let step = TemplateExecutionStep::new(
            Template {
                name: "e2e-template".to_string(),
                parameters: vec![TemplateParameter {
                    name: "CLUSTER_TYPE".to_string(),
                    required: true,
                }],
                pods: vec![Pod {
                    meta: ObjectMeta::named("", "runner"),
                    spec: PodSpec {
                        containers: vec![Container {
                            name: "test".to_string(),
                            args: vec!["--cluster-type=${CLUSTER_TYPE}".to_string()],
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    },
                }],
            },
            params,
            cluster.clone(),
            job_spec(),
        );

        step.run(&StepContext::new()).await.unwrap();
        let pods = cluster.submitted_pods();
        assert_eq!(pods[0].spec.containers[0].args, vec!["--cluster-type=aws"]);
        assert_eq!(pods[0].meta.namespace, "ci-op-1234");
    }

    #[tokio::test]
    async fn template_fails_on_missing_required_parameter() {
        let step = TemplateExecutionStep::new(
            Template {
                name: "t".to_string(),
                parameters: vec![TemplateParameter {
                    name: "MISSING".to_string(),
                    required: true,
                }],
                pods: Vec::new(),
            },
            Arc::new(DeferredParameters::new(BTreeMap::new())),
            Arc::new(FakeCluster::new("build01")),
            job_spec(),
        );
        assert!(step.run(&StepContext::new()).await.is_err());
    }
}
