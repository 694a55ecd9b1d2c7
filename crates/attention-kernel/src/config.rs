//! Configuration types for the kernel.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level kernel configuration.
///
/// Loaded from JSON at runtime; every field has a default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Pod pool sizing and backpressure
    pub pool: PoolConfig,

    /// Per-pod behavior
    pub pod: PodConfig,
}

/// Pod pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of pods, fixed for the life of the process
    pub size: usize,

    /// Delay before a request that found no free pod is re-submitted (milliseconds)
    pub retry_interval_ms: u64,
}

/// Pod configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PodConfig {
    /// Mailbox wait before an idle tick is generated (milliseconds)
    pub idle_timeout_ms: u64,

    /// What a pod hosting branches does with an idle tick
    pub idle_policy: IdlePolicy,

    /// What happens to a branch whose action fails
    pub failure_policy: FailurePolicy,

    /// Base seed for branch id generation; mixed with the pod id.
    /// Entropy-seeded when absent.
    pub seed: Option<u64>,
}

/// Routing of idle ticks to hosted branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Offer the tick to every hosted branch; branches whose breed declares a
    /// timer premise activate it and resume reasoning.
    #[default]
    Broadcast,
    /// Consume the tick at pod level.
    Silence,
}

/// Recovery when an action fails mid-reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep the branch, suspended at the stem whose effect failed.
    #[default]
    Isolate,
    /// Remove the branch from its pod.
    Evict,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            retry_interval_ms: 1,
        }
    }
}

impl Default for PodConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1_000,
            idle_policy: IdlePolicy::Broadcast,
            failure_policy: FailurePolicy::Isolate,
            seed: None,
        }
    }
}

impl PoolConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl PodConfig {
    /// `None` when the timeout is zero: the pod then never idles.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl KernelConfig {
    /// Load a configuration file, falling back to defaults for missing fields.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}
