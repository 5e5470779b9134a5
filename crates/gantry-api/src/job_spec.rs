//! Ambient identity of the job the operator runs as.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A git reference the job builds or tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Refs {
    pub org: String,
    pub repo: String,
    pub base_ref: String,
    pub base_sha: String,
    pub pulls: Vec<Pull>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pull {
    pub number: u64,
    pub author: String,
    pub sha: String,
}

/// Identity and placement of the running job: where objects are created and
/// which repository the work refers to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSpec {
    pub job: String,
    pub build_id: String,
    /// Namespace all per-job objects are created in.
    pub namespace: String,
    /// Namespace defaulted base images are resolved against.
    pub base_namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refs: Option<Refs>,
    pub extra_refs: Vec<Refs>,
}

impl JobSpec {
    /// Short stable hash of the job name, safe for object-name suffixes.
    pub fn job_name_hash(&self) -> String {
        let digest = Sha256::digest(self.job.as_bytes());
        hex::encode(digest)[..5].to_string()
    }

    /// Job name with characters invalid in object names replaced.
    pub fn job_name_safe(&self) -> String {
        self.job.replace('_', "-")
    }
}
