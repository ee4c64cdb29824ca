// ABOUTME: Configuration types and parsing for upgrade.yml.
// ABOUTME: Handles YAML parsing, serde defaults, and environment overrides for directories.

mod commands;
mod healthcheck;
mod privilege;

pub use commands::{ProvisionerConfig, RouterConfig};
pub use healthcheck::HealthcheckConfig;
pub use privilege::{PrivilegeConfig, PrivilegeMode};

use crate::error::{Error, Result};
use crate::privilege::AppOwner;
use crate::types::ServiceName;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/opt/devpush/upgrade.yml";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/devpush";
pub const DEFAULT_APP_DIR: &str = "/opt/devpush";

pub const DATA_DIR_ENV: &str = "DEVPUSH_DATA_DIR";
pub const APP_DIR_ENV: &str = "DEVPUSH_APP_DIR";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root-owned system directory holding state documents and locks.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Application directory owned by the app user.
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,

    /// Upgrade hooks directory; defaults to `<app_dir>/scripts/upgrade`.
    #[serde(default)]
    pub hooks_dir: Option<PathBuf>,

    #[serde(default)]
    pub app_owner: AppOwner,

    #[serde(default)]
    pub privilege: PrivilegeConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub healthcheck: HealthcheckConfig,

    /// Overall budget for a candidate to become healthy.
    #[serde(default = "default_health_timeout", with = "humantime_serde")]
    pub health_timeout: Duration,

    #[serde(default)]
    pub drain: DrainConfig,

    #[serde(default)]
    pub rollout: RolloutConfig,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Locks older than this are broken automatically.
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after: default_stale_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrainConfig {
    /// Time the former generation keeps serving in-flight requests after the swap.
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RolloutConfig {
    /// Services rolled out together, wave by wave.
    #[serde(default = "default_waves", deserialize_with = "deserialize_waves")]
    pub waves: NonEmpty<NonEmpty<ServiceName>>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            waves: default_waves(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_app_dir() -> PathBuf {
    PathBuf::from(DEFAULT_APP_DIR)
}

fn default_health_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(3600)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(10)
}

fn default_waves() -> NonEmpty<NonEmpty<ServiceName>> {
    let wave = |name: &'static str| NonEmpty::new(ServiceName::from_static(name));
    NonEmpty {
        head: wave("app"),
        tail: vec![wave("worker")],
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            app_dir: default_app_dir(),
            hooks_dir: None,
            app_owner: AppOwner::default(),
            privilege: PrivilegeConfig::default(),
            locks: LockConfig::default(),
            healthcheck: HealthcheckConfig::default(),
            health_timeout: default_health_timeout(),
            drain: DrainConfig::default(),
            rollout: RolloutConfig::default(),
            provisioner: ProvisionerConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load `path`, falling back to defaults when it does not exist, then
    /// apply `DEVPUSH_DATA_DIR` / `DEVPUSH_APP_DIR` overrides.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_path(DATA_DIR_ENV) {
            self.data_dir = dir;
        }
        if let Some(dir) = env_path(APP_DIR_ENV) {
            self.app_dir = dir;
        }
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.hooks_dir
            .clone()
            .unwrap_or_else(|| self.app_dir.join("scripts").join("upgrade"))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for service in self.rollout.waves.iter().flat_map(|wave| wave.iter()) {
            if !seen.insert(service) {
                return Err(Error::InvalidConfig(format!(
                    "service '{service}' appears in more than one rollout wave"
                )));
            }
        }
        if self.healthcheck.max_interval < self.healthcheck.interval {
            return Err(Error::InvalidConfig(
                "healthcheck.max_interval must not be shorter than healthcheck.interval"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn deserialize_waves<'de, D>(
    deserializer: D,
) -> std::result::Result<NonEmpty<NonEmpty<ServiceName>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let waves: Vec<Vec<ServiceName>> = Vec::deserialize(deserializer)?;
    let waves = waves
        .into_iter()
        .map(|wave| {
            NonEmpty::from_vec(wave)
                .ok_or_else(|| serde::de::Error::custom("rollout wave cannot be empty"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    NonEmpty::from_vec(waves)
        .ok_or_else(|| serde::de::Error::custom("at least one rollout wave is required"))
}
