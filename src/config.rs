//! Operator configuration loaded from the environment

use std::time::Duration;

use crate::{Error, Result};

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default driver when none is configured
pub const DEFAULT_DRIVER: &str = "noop";

/// Interval between CRD readiness checks
pub const DEFAULT_CRD_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline for the registered CRDs to become queryable
pub const DEFAULT_CRD_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Resync period handed to the snapshot controller
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(60);

const ENV_DRIVER: &str = "SNAPSHOTTER_DRIVER";
const ENV_IN_CLUSTER: &str = "SNAPSHOTTER_IN_CLUSTER";
const ENV_METRICS_PORT: &str = "SNAPSHOTTER_METRICS_PORT";
const ENV_POLL_INTERVAL: &str = "SNAPSHOTTER_CRD_POLL_INTERVAL_SECS";
const ENV_READY_TIMEOUT: &str = "SNAPSHOTTER_CRD_READY_TIMEOUT_SECS";
const ENV_RESYNC_INTERVAL: &str = "SNAPSHOTTER_RESYNC_INTERVAL_SECS";

/// Timing knobs for a bootstrap attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootstrapTimings {
    /// Fixed interval between readiness checks
    pub poll_interval: Duration,
    /// Wall-clock bound on the readiness wait
    pub ready_timeout: Duration,
    /// Resync period of the reconciliation loop
    pub resync_interval: Duration,
}

impl Default for BootstrapTimings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_CRD_POLL_INTERVAL,
            ready_timeout: DEFAULT_CRD_READY_TIMEOUT,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

/// Process-level operator configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub driver: String,
    pub in_cluster: bool,
    pub metrics_port: u16,
    pub timings: BootstrapTimings,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            in_cluster: false,
            metrics_port: DEFAULT_METRICS_PORT,
            timings: BootstrapTimings::default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let driver = match lookup(ENV_DRIVER) {
            Some(d) if d.trim().is_empty() => {
                return Err(Error::ConfigError(format!("{} cannot be empty", ENV_DRIVER)))
            }
            Some(d) => d.trim().to_string(),
            None => defaults.driver,
        };

        let in_cluster = match lookup(ENV_IN_CLUSTER) {
            Some(v) => parse_bool(ENV_IN_CLUSTER, &v)?,
            None => defaults.in_cluster,
        };

        let metrics_port = match lookup(ENV_METRICS_PORT) {
            Some(v) => v.trim().parse::<u16>().map_err(|e| {
                Error::ConfigError(format!("{} must be a port number: {}", ENV_METRICS_PORT, e))
            })?,
            None => defaults.metrics_port,
        };

        let timings = BootstrapTimings {
            poll_interval: parse_secs(&lookup, ENV_POLL_INTERVAL, DEFAULT_CRD_POLL_INTERVAL)?,
            ready_timeout: parse_secs(&lookup, ENV_READY_TIMEOUT, DEFAULT_CRD_READY_TIMEOUT)?,
            resync_interval: parse_secs(&lookup, ENV_RESYNC_INTERVAL, DEFAULT_RESYNC_INTERVAL)?,
        };

        Ok(Self {
            driver,
            in_cluster,
            metrics_port,
            timings,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(Error::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    let secs = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| Error::ConfigError(format!("{} must be whole seconds: {}", key, e)))?;
    if secs == 0 {
        return Err(Error::ConfigError(format!("{} must be > 0", key)));
    }
    Ok(Duration::from_secs(secs))
}
