//! Resolve release descriptors to pull specs over HTTP.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use gantry_api::{CandidateRelease, OfficialRelease, PrereleaseRelease, ReleaseDescriptor};

use crate::error::{EngineError, EngineResult};

/// Minimal HTTP boundary so resolution is testable without a network.
#[async_trait]
pub trait ReleaseHttpClient: Send + Sync {
    async fn get_json(&self, url: &str) -> EngineResult<Value>;
}

/// Production client backed by reqwest.
pub struct HttpReleaseClient {
    client: reqwest::Client,
}

impl HttpReleaseClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpReleaseClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReleaseHttpClient for HttpReleaseClient {
    async fn get_json(&self, url: &str) -> EngineResult<Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| EngineError::ReleaseEndpoint(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::ReleaseEndpoint(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| EngineError::ReleaseEndpoint(err.to_string()))
    }
}

/// Endpoints queried for release resolution.
#[derive(Debug, Clone)]
pub struct ReleaseEndpoints {
    /// Release controller serving candidate and prerelease streams.
    pub release_controller_url: String,
    /// Update service graph serving official releases.
    pub update_service_url: String,
}

impl Default for ReleaseEndpoints {
    fn default() -> Self {
        Self {
            release_controller_url: "https://releases.svc.ci.example.com".to_string(),
            update_service_url: "https://updates.api.example.com".to_string(),
        }
    }
}

/// Resolves candidate, official and prerelease descriptors to pull specs.
pub struct ReleaseResolver {
    http: Arc<dyn ReleaseHttpClient>,
    endpoints: ReleaseEndpoints,
}

impl ReleaseResolver {
    pub fn new(http: Arc<dyn ReleaseHttpClient>, endpoints: ReleaseEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Resolve whichever variant the descriptor carries.
    pub async fn resolve(&self, name: &str, descriptor: &ReleaseDescriptor) -> EngineResult<String> {
        if let Some(candidate) = &descriptor.candidate {
            return self.resolve_candidate(candidate).await;
        }
        if let Some(official) = &descriptor.release {
            return self.resolve_official(official).await.map(|(spec, _)| spec);
        }
        if let Some(prerelease) = &descriptor.prerelease {
            return self.resolve_prerelease(prerelease).await;
        }
        Err(EngineError::InvalidConfiguration(format!(
            "release {name} declares no candidate, release or prerelease"
        )))
    }

    /// Latest accepted candidate payload in the given stream.
    pub async fn resolve_candidate(&self, candidate: &CandidateRelease) -> EngineResult<String> {
        let stream = format!("{}.0-0.{}", candidate.version, candidate.stream);
        let url = format!(
            "{}/api/v1/releasestream/{}/latest",
            self.endpoints.release_controller_url, stream
        );
        let body = self.http.get_json(&url).await?;
        pull_spec_from(&body, &url)
    }

    /// Latest official release in the channel, with its version.
    pub async fn resolve_official(
        &self,
        official: &OfficialRelease,
    ) -> EngineResult<(String, String)> {
        let arch = default_architecture(&official.channel);
        let url = format!(
            "{}/api/upgrades_info/v1/graph?channel={}-{}&arch={}",
            self.endpoints.update_service_url, official.channel, official.version, arch
        );
        let body = self.http.get_json(&url).await?;
        let nodes = body
            .get("nodes")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::ReleaseEndpoint(format!("{url}: no nodes in graph")))?;

        let mut best: Option<(String, String)> = None;
        for node in nodes {
            let version = node.get("version").and_then(Value::as_str).unwrap_or("");
            let payload = node.get("payload").and_then(Value::as_str).unwrap_or("");
            if version.is_empty() || payload.is_empty() {
                continue;
            }
            let newer = match &best {
                Some((_, current)) => compare_versions(version, current) == std::cmp::Ordering::Greater,
                None => true,
            };
            if newer {
                best = Some((payload.to_string(), version.to_string()));
            }
        }
        best.ok_or_else(|| {
            EngineError::ReleaseEndpoint(format!(
                "no releases found in channel {}-{}",
                official.channel, official.version
            ))
        })
    }

    /// Latest payload within explicit version bounds.
    pub async fn resolve_prerelease(&self, prerelease: &PrereleaseRelease) -> EngineResult<String> {
        let url = format!(
            "{}/api/v1/releasestream/4-stable/latest?in=%3E{}%20%3C{}",
            self.endpoints.release_controller_url,
            prerelease.version_bounds.lower,
            prerelease.version_bounds.upper
        );
        let body = self.http.get_json(&url).await?;
        pull_spec_from(&body, &url)
    }
}

fn pull_spec_from(body: &Value, url: &str) -> EngineResult<String> {
    body.get("pullSpec")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::ReleaseEndpoint(format!("{url}: no pullSpec in response")))
}

fn default_architecture(_channel: &str) -> &'static str {
    "amd64"
}

/// Compare dotted version strings numerically, segment by segment.
fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let split = |v: &str| -> Vec<u64> {
        v.split(['.', '-', '+'])
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (a, b) = (split(a), split(b));
    let len = a.len().max(b.len());
    for i in 0..len {
        let (x, y) = (a.get(i).copied().unwrap_or(0), b.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

/// Canned responses keyed by URL, for tests.
pub struct FakeReleaseClient {
    pub responses: HashMap<String, Value>,
}

#[async_trait]
impl ReleaseHttpClient for FakeReleaseClient {
    async fn get_json(&self, url: &str) -> EngineResult<Value> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| EngineError::ReleaseEndpoint(format!("no canned response for {url}")))
    }
}
