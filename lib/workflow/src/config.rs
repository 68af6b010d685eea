//! Engine configuration.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on a whole run: five minutes.
pub const DEFAULT_MAX_EXECUTION_TIME_MS: u64 = 300_000;

/// Limits and defaults applied to every run of an engine.
///
/// Field names stay snake_case, unlike workflow documents, because this
/// struct is loaded from environment variables whose keys arrive lowercased
/// (`NODEFLOW_ENGINE__MAX_CONCURRENCY` becomes `max_concurrency`).
/// `default_retry` keeps the camelCase [`RetryPolicy`] document shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on a whole run.
    pub max_execution_time_ms: u64,
    /// Maximum number of nodes running at once within a round.
    pub max_concurrency: Option<usize>,
    /// Per-attempt timeout for nodes that do not set their own.
    pub node_timeout_ms: Option<u64>,
    /// Retry policy for nodes that do not set their own.
    pub default_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_time_ms: DEFAULT_MAX_EXECUTION_TIME_MS,
            max_concurrency: None,
            node_timeout_ms: None,
            default_retry: RetryPolicy::NONE,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    #[must_use]
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Bounds in-round concurrency. Zero is treated as one.
    #[must_use]
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    #[must_use]
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = retry;
        self
    }
}
