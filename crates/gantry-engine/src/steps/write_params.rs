//! Flush the parameter store to a file.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use gantry_api::{DeferredParameters, StepLink};

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Resolves every registered parameter and writes them as shell-style
/// `KEY='value'` lines, sorted by key.
pub struct WriteParametersStep {
    params: Arc<DeferredParameters>,
    path: PathBuf,
}

impl WriteParametersStep {
    pub fn new(params: Arc<DeferredParameters>, path: impl Into<PathBuf>) -> Self {
        Self {
            params,
            path: path.into(),
        }
    }
}

#[async_trait]
impl Step for WriteParametersStep {
    fn name(&self) -> String {
        "parameters/write".to_string()
    }

    fn description(&self) -> String {
        format!("Write the job parameters to {}", self.path.display())
    }

    fn requires(&self) -> Vec<StepLink> {
        Vec::new()
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    async fn run(&self, ctx: &StepContext) -> EngineResult<()> {
        ctx.ensure_active()?;
        let values = self.params.resolve_all()?;
        let mut out = String::new();
        for (key, value) in values {
            let escaped = value.replace('\'', r"'\''");
            out.push_str(&format!("{key}='{escaped}'\n"));
        }
        tokio::fs::write(&self.path, out).await?;
        Ok(())
    }
}
