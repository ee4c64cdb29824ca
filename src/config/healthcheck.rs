// ABOUTME: Candidate health check policy.
// ABOUTME: Probe cadence, per-probe timeout, retry budget, and backoff cap with defaults.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthcheckConfig {
    /// Delay before the first backoff step.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Upper bound on the delay between probes.
    #[serde(default = "default_max_interval", with = "humantime_serde")]
    pub max_interval: Duration,

    /// Per-probe timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Failed probes tolerated before the candidate is declared unhealthy.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Grace period before the first probe.
    #[serde(default = "default_start_period", with = "humantime_serde")]
    pub start_period: Duration,
}

impl Default for HealthcheckConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            max_interval: default_max_interval(),
            timeout: default_timeout(),
            retries: default_retries(),
            start_period: default_start_period(),
        }
    }
}

impl HealthcheckConfig {
    /// Delay before probe number `attempt` (0-based), doubling from
    /// `interval` up to `max_interval`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retries() -> u32 {
    3
}

fn default_start_period() -> Duration {
    Duration::from_secs(5)
}
