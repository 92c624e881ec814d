//! Controller configuration, built once at startup and shared read-only afterwards.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Number of reconcile workers pulling from the queue. Must be at least one.
    pub workers: usize,
    /// Restricts watches and writes to one namespace, `None` watches all of them.
    pub namespace: Option<String>,
    /// Interval at which every cached `ServerlessFunc` is enqueued again. Zero disables resync.
    pub resync_interval: Duration,
    pub rate_limit: RateLimitConfig,
    pub cache_sync_timeout: Duration,
    /// React to changes of managed deployments by enqueueing their owner. Off by default, in
    /// which case drift on a deployment is only corrected by the next spec triggered pass.
    pub watch_runner_drift: bool,
    pub resources: ResourceDefaults,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            namespace: None,
            resync_interval: Duration::from_secs(60),
            rate_limit: RateLimitConfig::default(),
            cache_sync_timeout: Duration::from_secs(120),
            watch_runner_drift: false,
            resources: ResourceDefaults::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::UserInput("workers must be at least 1".to_owned()));
        }
        self.rate_limit.validate()
    }
}

/// Retry policy for failed keys: the larger of a per-key exponential delay and a token bucket
/// shared by all keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Refill rate of the shared bucket, in retries per second.
    pub qps: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            qps: 10.0,
            burst: 100,
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<()> {
        if self.base_delay > self.max_delay {
            return Err(Error::UserInput(format!(
                "rate limit base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !(self.qps.is_finite() && self.qps > 0.0) {
            return Err(Error::UserInput(format!("rate limit qps must be positive, got {}", self.qps)));
        }
        if self.burst == 0 {
            return Err(Error::UserInput("rate limit burst must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Fixed parts of the objects the controller creates for every function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceDefaults {
    pub revision_history_limit: i32,
    pub run_as_user: i64,
    pub run_as_group: i64,
    pub pilot_image: String,
    pub rpc_image: String,
    pub workspace_claim: String,
    pub pilot_port: i32,
    pub rpc_port: i32,
    /// Port the service exposes and the ingress routes to.
    pub service_port: i32,
    pub pilot_limits: ContainerLimits,
    pub rpc_limits: ContainerLimits,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            revision_history_limit: 2,
            run_as_user: 1000,
            run_as_group: 3000,
            pilot_image: "localhost:32000/serverless-pilot:v0.0.1".to_owned(),
            rpc_image: "localhost:32000/alpine:v0.0.1".to_owned(),
            workspace_claim: "ide-workspaces-pvc".to_owned(),
            pilot_port: 8080,
            rpc_port: 30000,
            service_port: 80,
            pilot_limits: ContainerLimits {
                cpu_millis: 10,
                memory_mib: 20,
            },
            rpc_limits: ContainerLimits {
                cpu_millis: 20,
                memory_mib: 40,
            },
        }
    }
}

/// Zero leaves the corresponding limit unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContainerLimits {
    pub cpu_millis: u32,
    pub memory_mib: u32,
}
