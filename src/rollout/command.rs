// ABOUTME: Provisioner and Router backed by configured shell commands.
// ABOUTME: Commands run through the PrivilegeGate with the generation described in the environment.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::{CollaboratorError, Generation, HealthStatus, Provisioner, Router};
use crate::config::{ProvisionerConfig, RouterConfig};
use crate::privilege::{CommandOutput, PrivilegeGate, PrivilegedCommand};

/// Health command exit code meaning "still starting".
pub const EXIT_STARTING: i32 = 75;

/// Shared plumbing: run `sh -c <script>` for a generation.
#[derive(Clone)]
struct ShellRunner {
    gate: Arc<dyn PrivilegeGate>,
    data_dir: PathBuf,
    app_dir: PathBuf,
}

impl ShellRunner {
    fn env(&self, generation: &Generation) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "DEVPUSH_SERVICE".to_string(),
            generation.service.to_string(),
        );
        env.insert("DEVPUSH_GENERATION".to_string(), generation.id.to_string());
        if let Some(version) = &generation.version {
            env.insert("DEVPUSH_VERSION".to_string(), version.to_string());
        }
        env.insert(
            "DEVPUSH_DATA_DIR".to_string(),
            self.data_dir.display().to_string(),
        );
        env.insert(
            "DEVPUSH_APP_DIR".to_string(),
            self.app_dir.display().to_string(),
        );
        env
    }

    async fn run(
        &self,
        script: &str,
        generation: &Generation,
    ) -> Result<CommandOutput, CollaboratorError> {
        let command = PrivilegedCommand::new("sh")
            .arg("-c")
            .arg(script)
            .envs(self.env(generation))
            .current_dir(&self.app_dir);
        tracing::debug!(generation = %generation, "running: {}", script);
        Ok(self.gate.exec_privileged(&command).await?)
    }

    async fn run_checked(
        &self,
        operation: &'static str,
        script: &str,
        generation: &Generation,
    ) -> Result<(), CollaboratorError> {
        let output = self.run(script, generation).await?;
        if output.success {
            Ok(())
        } else {
            Err(command_error(operation, generation, &output))
        }
    }
}

fn command_error(
    operation: &'static str,
    generation: &Generation,
    output: &CommandOutput,
) -> CollaboratorError {
    let stderr = output.stderr.trim();
    let message = match output.exit_code {
        Some(code) if stderr.is_empty() => format!("exit code {code}"),
        Some(code) => format!("exit code {code}: {stderr}"),
        None => "terminated by signal".to_string(),
    };
    CollaboratorError::Command {
        operation,
        generation: generation.id.to_string(),
        message,
    }
}

/// Provisioner running the `provisioner.*` commands.
#[derive(Clone)]
pub struct CommandProvisioner {
    runner: ShellRunner,
    config: ProvisionerConfig,
}

impl CommandProvisioner {
    pub fn new(
        gate: Arc<dyn PrivilegeGate>,
        config: ProvisionerConfig,
        data_dir: PathBuf,
        app_dir: PathBuf,
    ) -> Self {
        Self {
            runner: ShellRunner {
                gate,
                data_dir,
                app_dir,
            },
            config,
        }
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn start_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.runner
            .run_checked("start", &self.config.start, generation)
            .await
    }

    async fn health_status(
        &self,
        generation: &Generation,
    ) -> Result<HealthStatus, CollaboratorError> {
        let output = self.runner.run(&self.config.health, generation).await?;
        Ok(match output.exit_code {
            Some(0) => HealthStatus::Healthy,
            Some(EXIT_STARTING) => HealthStatus::Starting,
            _ => HealthStatus::Unhealthy,
        })
    }

    async fn stop_generation(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.runner
            .run_checked("stop", &self.config.stop, generation)
            .await
    }
}

/// Router running the `router.switch` command.
#[derive(Clone)]
pub struct CommandRouter {
    runner: ShellRunner,
    config: RouterConfig,
}

impl CommandRouter {
    pub fn new(
        gate: Arc<dyn PrivilegeGate>,
        config: RouterConfig,
        data_dir: PathBuf,
        app_dir: PathBuf,
    ) -> Self {
        Self {
            runner: ShellRunner {
                gate,
                data_dir,
                app_dir,
            },
            config,
        }
    }
}

#[async_trait]
impl Router for CommandRouter {
    async fn switch_active(&self, generation: &Generation) -> Result<(), CollaboratorError> {
        self.runner
            .run_checked("switch", &self.config.switch, generation)
            .await
    }
}
