//! Step graph planner and executor for the gantry CI operator.
//!
//! The planner ([`defaults`]) interprets a [`gantry_api::ReleaseBuildConfiguration`]
//! into step objects; the executor ([`execute`]) schedules them in parallel
//! under dependency constraints; [`release`] holds the payload and promotion
//! machinery.

pub mod defaults;
pub mod error;
pub mod execute;
pub mod graph;
pub mod release;
pub mod step;
pub mod steps;

pub use defaults::{
    from_config, lease_type_from_cluster_type, step_configs_for_build, PlannedSteps,
    StepFactoryContext, DEFAULT_LEASE_ENV,
};
pub use error::{EngineError, EngineResult};
pub use execute::run_steps;
pub use graph::{dependency_edges, required_steps};
pub use release::payload::{AssembleReleaseStep, ImportReleaseStep};
pub use release::promote::{
    promoted_tags, promotion_pod, public_image_reference, to_promote, PromotionStep,
    PUSH_SECRET_MOUNT_PATH, PUSH_SECRET_NAME,
};
pub use release::resolve::{
    FakeReleaseClient, HttpReleaseClient, ReleaseEndpoints, ReleaseHttpClient, ReleaseResolver,
};
pub use release::stable::{ReleaseImagesTagStep, StableImagesTagStep};
pub use step::{Step, StepContext};
pub use steps::lease::{LeaseClient, LeaseStep};
pub use steps::test::{Template, TemplateParameter};
