//! Conflict retry with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::error::{ClusterError, ClusterResult};

/// Deterministic exponential backoff parameters.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    /// Total number of attempts, including the first.
    pub steps: u32,
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: f64,
    /// Relative jitter applied to each delay, e.g. 0.1 for ±10 %.
    pub jitter: f64,
}

impl Backoff {
    /// The backoff used for destination writes during promotion.
    pub fn promotion() -> Self {
        Self {
            steps: 20,
            initial: Duration::from_millis(10),
            factor: 1.2,
            jitter: 0.1,
        }
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0))
    }
}

/// Run `op` until it succeeds or fails with a non-conflict error.
///
/// Conflicts are retried up to `backoff.steps` attempts with jittered
/// exponential delays; the final conflict is returned when attempts are
/// exhausted. Every other error is terminal.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut op: F) -> ClusterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClusterResult<T>>,
{
    let mut delay = backoff.initial;
    let mut last: Option<ClusterError> = None;
    for attempt in 0..backoff.steps {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() => {
                debug!(attempt, "retrying conflicting write");
                last = Some(err);
                if attempt + 1 < backoff.steps {
                    tokio::time::sleep(backoff.jittered(delay)).await;
                    delay = delay.mul_f64(backoff.factor);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last.unwrap_or_else(|| ClusterError::Api("retry with zero steps".to_string())))
}
