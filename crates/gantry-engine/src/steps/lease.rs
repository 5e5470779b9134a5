//! Lease acquisition around a wrapped step.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use gantry_api::{ParameterMap, StepLease, StepLink};

use crate::error::{EngineError, EngineResult};
use crate::step::{Step, StepContext};

/// Client for the external lease service. Opaque to the engine.
#[async_trait]
pub trait LeaseClient: Send + Sync {
    /// Acquire one lease of `resource_type`, returning its name.
    async fn acquire(&self, resource_type: &str) -> EngineResult<String>;

    /// Release a previously acquired lease.
    async fn release(&self, lease: &str) -> EngineResult<()>;
}

/// Wraps a step so that the configured leases are held for the duration of
/// its `run`. Leases are released on every exit path.
pub struct LeaseStep {
    client: Arc<dyn LeaseClient>,
    leases: Vec<StepLease>,
    inner: Arc<dyn Step>,
    acquired: Arc<Mutex<Vec<(String, String)>>>,
}

impl LeaseStep {
    pub fn new(client: Arc<dyn LeaseClient>, leases: Vec<StepLease>, inner: Arc<dyn Step>) -> Self {
        Self {
            client,
            leases,
            inner,
            acquired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn release_all(&self) {
        let held: Vec<(String, String)> = self.acquired.lock().unwrap().drain(..).collect();
        for (_, name) in held {
            if let Err(err) = self.client.release(&name).await {
                tracing::warn!(lease = %name, error = %err, "failed to release lease");
            }
        }
    }
}

#[async_trait]
impl Step for LeaseStep {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn requires(&self) -> Vec<StepLink> {
        self.inner.requires()
    }

    fn creates(&self) -> Vec<StepLink> {
        self.inner.creates()
    }

    fn provides(&self) -> ParameterMap {
        let mut params = self.inner.provides();
        for lease in &self.leases {
            if lease.env.is_empty() {
                continue;
            }
            let env = lease.env.clone();
            let acquired = Arc::clone(&self.acquired);
            params.insert(
                env.clone(),
                Arc::new(move || {
                    let held = acquired.lock().unwrap();
                    let names: Vec<String> = held
                        .iter()
                        .filter(|(e, _)| e == &env)
                        .map(|(_, n)| n.clone())
                        .collect();
                    if names.is_empty() {
                        return Err(gantry_api::ApiError::ParameterUnavailable {
                            name: env.clone(),
                        });
                    }
                    Ok(names.join(" "))
                }),
            );
        }
        params
    }

    fn inputs(&self) -> EngineResult<Vec<String>> {
        self.inner.inputs()
    }

    fn validate(&self) -> EngineResult<()> {
        self.inner.validate()
    }

    fn exempt_from_input_substitution(&self) -> bool {
        self.inner.exempt_from_input_substitution()
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        for lease in &self.leases {
            for _ in 0..lease.count.max(1) {
                match self.client.acquire(&lease.resource_type).await {
                    Ok(name) => {
                        tracing::debug!(lease = %name, resource = %lease.resource_type, "acquired lease");
                        self.acquired
                            .lock()
                            .unwrap()
                            .push((lease.env.clone(), name));
                    }
                    Err(err) => {
                        self.release_all().await;
                        return Err(EngineError::Lease(format!(
                            "failed to acquire {}: {err}",
                            lease.resource_type
                        )));
                    }
                }
            }
        }

        let result = self.inner.run(ctx).await;
        self.release_all().await;
        result
    }
}
