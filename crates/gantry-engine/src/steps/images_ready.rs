//! Synthetic sink over the published images.

use async_trait::async_trait;

use gantry_api::StepLink;

use crate::error::EngineResult;
use crate::step::{Step, StepContext};

/// Completes once every stable image link has been produced. Targetable as
/// `[images]` to build and publish everything without running tests.
pub struct ImagesReadyStep {
    links: Vec<StepLink>,
}

impl ImagesReadyStep {
    pub fn new(links: Vec<StepLink>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl Step for ImagesReadyStep {
    fn name(&self) -> String {
        "[images]".to_string()
    }

    fn description(&self) -> String {
        "All images are built and tagged into stable".to_string()
    }

    fn requires(&self) -> Vec<StepLink> {
        self.links.clone()
    }

    fn creates(&self) -> Vec<StepLink> {
        Vec::new()
    }

    async fn run(&self, _ctx: &StepContext) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_all_given_links() {
        let links = vec![
            StepLink::StableImage {
                stream: "stable".to_string(),
                tag: "cli".to_string(),
            },
            StepLink::StableImage {
                stream: "stable".to_string(),
                tag: "operator".to_string(),
            },
        ];
        let step = ImagesReadyStep::new(links.clone());
        assert_eq!(step.name(), "[images]");
        assert_eq!(step.requires(), links);
        assert!(step.creates().is_empty());
    }
}
