//! RPM injection and the in-namespace RPM repository.

use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{
    static_supplier, JobSpec, ParameterMap, ResourceRequirements,
    RpmImageInjectionStepConfiguration, RpmServeStepConfiguration, StepLink,
};
use gantry_cluster::{BuildSource, ClusterClient, Container, ObjectMeta, Pod, PodSpec};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Name of the pod serving built RPMs inside the job namespace.
const RPM_REPO_POD: &str = "rpm-repo";

fn rpm_repo_url(namespace: &str) -> String {
    format!("http://{RPM_REPO_POD}.{namespace}.svc.cluster.local")
}

/// Layers a repo definition pointing at the served RPMs into a base image.
pub struct RpmImageInjectionStep {
    config: RpmImageInjectionStepConfiguration,
    resources: ResourceRequirements,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl RpmImageInjectionStep {
    pub fn new(
        config: RpmImageInjectionStepConfiguration,
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
}

#[async_trait]
impl Step for RpmImageInjectionStep {
    fn name(&self) -> String {
        self.config.to.clone()
    }

    fn description(&self) -> String {
        format!(
            "Inject an RPM repository definition into image {}",
            self.config.from
        )
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![
            StepLink::PipelineImage(self.config.from.clone()),
            StepLink::RpmRepo,
        ]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.to.clone())]
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let url = rpm_repo_url(&self.job_spec.namespace);
        let commands = format!(
            "echo -e '[built]\\nname=built\\nbaseurl={url}\\ngpgcheck=0\\nenabled=1' > /etc/yum.repos.d/built.repo"
        );
        let build = super::pipeline_build(
            &self.job_spec,
            &self.config.to,
            Some(&self.config.from),
            BuildSource::Commands { commands },
            &self.config.to,
            &self.resources,
        );
        self.client.run_build(&build).await?;
        Ok(())
    }
}

/// Serves `pipeline:<from>`'s RPM output over HTTP for the rest of the job.
/// The serving pod is long-running; the step completes once it is created.
pub struct RpmServeStep {
    config: RpmServeStepConfiguration,
    client: Arc<dyn ClusterClient>,
    job_spec: Arc<JobSpec>,
}

impl RpmServeStep {
    pub fn new(
        config: RpmServeStepConfiguration,
        client: Arc<dyn ClusterClient>,
        job_spec: Arc<JobSpec>,
    ) -> Self {
        Self {
            config,
            client,
            job_spec,
        }
    }
}

#[async_trait]
impl Step for RpmServeStep {
    fn name(&self) -> String {
        "[serve:rpms]".to_string()
    }

    fn description(&self) -> String {
        "Start serving RPMs after successful build".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        vec![StepLink::PipelineImage(self.config.from.clone())]
    }

    fn creates(&self) -> Vec<StepLink> {
        vec![StepLink::RpmRepo]
    }

    fn provides(&self) -> ParameterMap {
        let mut params = ParameterMap::new();
        params.insert(
            "RPM_REPO_URL".to_string(),
            static_supplier(rpm_repo_url(&self.job_spec.namespace)),
        );
        params
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let pod = Pod {
            meta: ObjectMeta::named(self.job_spec.namespace.clone(), RPM_REPO_POD),
            spec: PodSpec {
                containers: vec![Container {
                    name: RPM_REPO_POD.to_string(),
                    image: format!("pipeline:{}", self.config.from),
                    command: vec!["/bin/sh".to_string(), "-c".to_string()],
                    args: vec![format!(
                        "cd {} && exec python3 -m http.server 80",
                        gantry_api::RPM_SERVE_LOCATION
                    )],
                    ..Container::default()
                }],
                ..PodSpec::default()
            },
        };
        self.client.create_pod(&pod).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_cluster::fakes::FakeCluster;

    fn job_spec() -> Arc<JobSpec> {
        Arc::new(JobSpec {
            namespace: "ci-op-1234".to_string(),
            ..JobSpec::default()
        })
    }

    #[tokio::test]
    async fn serve_step_creates_the_repo_pod_and_parameter() {
        let cluster = Arc::new(FakeCluster::new("build01"));
        let step = RpmServeStep::new(
            RpmServeStepConfiguration {
                from: "rpms".to_string(),
            },
            cluster.clone(),
            job_spec(),
        );

        assert_eq!(step.creates(), vec![StepLink::RpmRepo]);
        step.run(&StepContext::new()).await.unwrap();

        let pods = cluster.submitted_pods();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].meta.name, "rpm-repo");

        let provides = step.provides();
        let url = provides.get("RPM_REPO_URL").unwrap()().unwrap();
        assert_eq!(url, "http://rpm-repo.ci-op-1234.svc.cluster.local");
    }

    #[tokio::test]
    async fn injection_step_depends_on_the_repo() {
        let step = RpmImageInjectionStep::new(
            RpmImageInjectionStepConfiguration {
                from: "base-without-rpms".to_string(),
                to: "base".to_string(),
            },
            ResourceRequirements::default(),
            Arc::new(FakeCluster::new("build01")),
            job_spec(),
        );
        assert!(step.requires().contains(&StepLink::RpmRepo));
    }
}
