// ABOUTME: Test support utilities.
// ABOUTME: Provides a temporary installation and scripted provisioner/router fakes.

use async_trait::async_trait;
use devpush::config::{Config, PrivilegeMode};
use devpush::privilege::{AppOwner, GateMode, PrivilegeGate, SystemGate};
use devpush::rollout::{CollaboratorError, Generation, HealthStatus, Provisioner, Router};
use devpush::state::StateStore;
use devpush::types::ServiceName;
use devpush::upgrade::UpgradeOrchestrator;
use nonempty::NonEmpty;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("devpush=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

#[allow(dead_code)]
pub fn service(name: &str) -> ServiceName {
    ServiceName::new(name).unwrap()
}

/// A gate that runs everything as the current user.
#[allow(dead_code)]
pub fn direct_gate() -> Arc<dyn PrivilegeGate> {
    Arc::new(SystemGate::new(GateMode::Root, AppOwner::default()))
}

/// One observed collaborator call, e.g. `start app-blue-1.1.0`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Provisioner with per-service scripted health answers.
#[derive(Default)]
pub struct FakeProvisioner {
    calls: CallLog,
    scripted: Mutex<HashMap<String, VecDeque<HealthStatus>>>,
    steady: Mutex<HashMap<String, HealthStatus>>,
    fail_start: Mutex<HashSet<String>>,
    fail_stop: Mutex<HashSet<String>>,
    start_delay: Mutex<HashMap<String, Duration>>,
}

#[allow(dead_code)]
impl FakeProvisioner {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    /// Answers returned in order before the steady answer.
    pub fn script_health(&self, service: &str, answers: Vec<HealthStatus>) {
        self.scripted
            .lock()
            .insert(service.to_string(), answers.into());
    }

    /// Answer once the script is exhausted (default `Healthy`).
    pub fn set_health(&self, service: &str, status: HealthStatus) {
        self.steady.lock().insert(service.to_string(), status);
    }

    pub fn fail_start(&self, service: &str) {
        self.fail_start.lock().insert(service.to_string());
    }

    pub fn fail_stop(&self, service: &str) {
        self.fail_stop.lock().insert(service.to_string());
    }

    /// Make `start` take `delay`; an `up <gen>` entry is logged when it returns.
    pub fn slow_start(&self, service: &str, delay: Duration) {
        self.start_delay.lock().insert(service.to_string(), delay);
    }

    fn record(&self, call: &str, generation: &Generation) {
        self.calls.lock().push(format!("{call} {generation}"));
    }

    fn command_error(operation: &'static str, generation: &Generation) -> CollaboratorError {
        CollaboratorError::Command {
            operation,
            generation: generation.to_string(),
            message: "scripted failure".to_string(),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn start_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.record("start", generation);
        if self.fail_start.lock().contains(generation.service.as_str()) {
            return Err(Self::command_error("start", generation));
        }
        let delay = self.start_delay.lock().get(generation.service.as_str()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.record("up", generation);
        }
        Ok(())
    }

    async fn health_status(
        &self,
        generation: &Generation,
    ) -> Result<HealthStatus, CollaboratorError> {
        self.record("health", generation);
        let service = generation.service.as_str();
        if let Some(answer) = self
            .scripted
            .lock()
            .get_mut(service)
            .and_then(VecDeque::pop_front)
        {
            return Ok(answer);
        }
        Ok(self
            .steady
            .lock()
            .get(service)
            .cloned()
            .unwrap_or(HealthStatus::Healthy))
    }

    async fn stop_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.record("stop", generation);
        if self.fail_stop.lock().contains(generation.service.as_str()) {
            return Err(Self::command_error("stop", generation));
        }
        Ok(())
    }
}

/// Router that records switches and tracks the live generation per service.
#[derive(Default)]
pub struct FakeRouter {
    calls: CallLog,
    live: Mutex<HashMap<String, String>>,
    fail_for: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl FakeRouter {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    /// Refuse every switch for `service`.
    pub fn fail_for(&self, service: &str) {
        self.fail_for.lock().insert(service.to_string());
    }

    /// Generation currently receiving traffic for `service`.
    pub fn live(&self, service: &str) -> Option<String> {
        self.live.lock().get(service).cloned()
    }
}

#[async_trait]
impl Router for FakeRouter {
    async fn switch_active(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.calls.lock().push(format!("switch {generation}"));
        let service = generation.service.as_str();
        if self.fail_for.lock().contains(service) {
            return Err(CollaboratorError::Command {
                operation: "switch",
                generation: generation.to_string(),
                message: "router refused".to_string(),
            });
        }
        self.live
            .lock()
            .insert(service.to_string(), generation.to_string());
        Ok(())
    }
}

/// Fakes sharing one call log.
#[allow(dead_code)]
pub struct Fakes {
    pub calls: CallLog,
    pub provisioner: Arc<FakeProvisioner>,
    pub router: Arc<FakeRouter>,
}

#[allow(dead_code)]
impl Fakes {
    pub fn new() -> Self {
        let calls = CallLog::default();
        Self {
            provisioner: Arc::new(FakeProvisioner::new(Arc::clone(&calls))),
            router: Arc::new(FakeRouter::new(Arc::clone(&calls))),
            calls,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }
}

/// A throwaway installation: data dir, app dir, hooks dir, and a config
/// pointing at them with fast health checks.
#[allow(dead_code)]
pub struct TestInstall {
    pub root: TempDir,
    pub config: Config,
}

#[allow(dead_code)]
impl TestInstall {
    /// An installation with `version` recorded in `version.json`.
    pub fn new(version: &str) -> Self {
        let install = Self::empty();
        fs::write(
            install.data_dir().join("version.json"),
            format!(r#"{{"version": "{version}"}}"#),
        )
        .unwrap();
        install
    }

    /// An installation without `version.json`.
    pub fn empty() -> Self {
        let root = tempfile::tempdir().unwrap();
        let data_dir = root.path().join("data");
        let app_dir = root.path().join("app");
        fs::create_dir_all(&data_dir).unwrap();
        fs::create_dir_all(app_dir.join("scripts").join("upgrade")).unwrap();

        let mut config = Config::default();
        config.data_dir = data_dir;
        config.app_dir = app_dir;
        config.privilege.mode = PrivilegeMode::Direct;
        config.privilege.enforce_app_ownership = false;
        config.healthcheck.interval = Duration::from_millis(5);
        config.healthcheck.max_interval = Duration::from_millis(20);
        config.healthcheck.timeout = Duration::from_secs(1);
        config.healthcheck.retries = 2;
        config.healthcheck.start_period = Duration::ZERO;
        config.health_timeout = Duration::from_secs(5);
        config.drain.grace_period = Duration::ZERO;

        Self { root, config }
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn app_dir(&self) -> &Path {
        &self.config.app_dir
    }

    pub fn hooks_dir(&self) -> PathBuf {
        self.config.hooks_dir()
    }

    /// Roll out these waves instead of the default `[[app], [worker]]`.
    pub fn with_waves(mut self, waves: &[&[&str]]) -> Self {
        let mut waves = waves.iter().map(|wave| {
            NonEmpty::from_vec(wave.iter().map(|name| service(name)).collect()).unwrap()
        });
        let head = waves.next().unwrap();
        self.config.rollout.waves = NonEmpty {
            head,
            tail: waves.collect(),
        };
        self
    }

    /// Write an executable hook script.
    pub fn write_hook(&self, name: &str, body: &str) -> PathBuf {
        let path = self.hooks_dir().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A hook that appends its version to `<app_dir>/hooks.log`.
    pub fn write_logging_hook(&self, version: &str) -> PathBuf {
        self.write_hook(
            &format!("{version}.sh"),
            &format!(r#"echo "{version} $DEVPUSH_FROM_VERSION $DEVPUSH_TO_VERSION" >> "$DEVPUSH_APP_DIR/hooks.log""#),
        )
    }

    /// Lines of `<app_dir>/hooks.log`, empty if no hook ran.
    pub fn hook_log(&self) -> Vec<String> {
        fs::read_to_string(self.app_dir().join("hooks.log"))
            .map(|content| content.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(direct_gate(), &self.config.data_dir)
    }

    pub fn orchestrator(
        &self,
        fakes: &Fakes,
    ) -> UpgradeOrchestrator<Arc<FakeProvisioner>, Arc<FakeRouter>> {
        UpgradeOrchestrator::new(
            &self.config,
            direct_gate(),
            Arc::clone(&fakes.provisioner),
            Arc::clone(&fakes.router),
        )
    }

    /// Raw `version.json` contents.
    pub fn version_document(&self) -> serde_json::Value {
        let bytes = fs::read(self.data_dir().join("version.json")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Lock files left in the lock directory; the hidden guard file is not a lock.
    pub fn lock_files(&self) -> Vec<String> {
        match fs::read_dir(self.config.lock_dir()) {
            Ok(entries) => entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".lock"))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
