// ABOUTME: Integration tests for the devpush CLI commands.
// ABOUTME: Runs the binary against a temporary installation with shell collaborators.

use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn devpush_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("devpush"))
}

/// A temporary installation plus an upgrade.yml pointing at it.
struct Install {
    root: TempDir,
}

impl Install {
    fn new(version: &str, health: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let install = Self { root };
        fs::create_dir_all(install.data_dir()).unwrap();
        fs::create_dir_all(install.hooks_dir()).unwrap();
        fs::write(
            install.data_dir().join("version.json"),
            format!(r#"{{"version": "{version}"}}"#),
        )
        .unwrap();

        let config = format!(
            r#"
data_dir: {data}
app_dir: {app}
privilege:
  mode: direct
  enforce_app_ownership: false
healthcheck:
  interval: 10ms
  max_interval: 20ms
  timeout: 1s
  retries: 1
  start_period: 0s
health_timeout: 5s
drain:
  grace_period: 0s
rollout:
  waves: [[app]]
provisioner:
  start: "true"
  health: "{health}"
  stop: "true"
"#,
            data = install.data_dir().display(),
            app = install.app_dir().display(),
        );
        fs::write(install.config_path(), config).unwrap();
        install
    }

    fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    fn app_dir(&self) -> PathBuf {
        self.root.path().join("app")
    }

    fn hooks_dir(&self) -> PathBuf {
        self.app_dir().join("scripts").join("upgrade")
    }

    fn config_path(&self) -> PathBuf {
        self.root.path().join("upgrade.yml")
    }

    fn write_hook(&self, name: &str, body: &str) {
        let path = self.hooks_dir().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = devpush_cmd();
        cmd.arg("--config")
            .arg(self.config_path())
            .env_remove("DEVPUSH_DATA_DIR")
            .env_remove("DEVPUSH_APP_DIR")
            .env_remove("RUST_LOG");
        cmd
    }

    fn installed(&self) -> String {
        read_json(&self.data_dir().join("version.json"))["version"]
            .as_str()
            .unwrap()
            .to_string()
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
}

#[test]
fn help_shows_commands() {
    devpush_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("config"));
}

mod upgrade {
    use super::*;

    #[test]
    fn successful_upgrade_exits_zero_and_commits() {
        let install = Install::new("1.0.0", "true");

        install
            .cmd()
            .args(["upgrade", "--target", "1.1.0"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1.1.0"));

        assert_eq!(install.installed(), "1.1.0");
        let active = fs::read_to_string(install.data_dir().join("active-app")).unwrap();
        assert_eq!(active.trim(), "app-blue-1.1.0");
        assert!(!install.data_dir().join("locks").join("upgrade.lock").exists());
    }

    #[test]
    fn hook_failure_still_exits_zero_with_warning() {
        let install = Install::new("0.1.0", "true");
        install.write_hook("0.1.1.sh", "exit 1");
        install.write_hook("1.0.0.sh", "true");

        install
            .cmd()
            .args(["upgrade", "--target", "1.0.0"])
            .assert()
            .success()
            .stderr(predicate::str::contains("Warning"))
            .stderr(predicate::str::contains("0.1.1"));

        assert_eq!(install.installed(), "1.0.0");
    }

    #[test]
    fn json_mode_prints_the_report() {
        let install = Install::new("1.0.0", "true");

        let output = install
            .cmd()
            .args(["--json", "upgrade", "--target", "1.1.0"])
            .output()
            .unwrap();

        assert!(output.status.success());
        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["outcome"], "clean");
        assert_eq!(report["installed_version"], "1.1.0");
        assert_eq!(report["waves"][0]["services"][0]["status"], "committed");
    }

    #[test]
    fn rolled_back_upgrade_exits_four() {
        let install = Install::new("1.0.0", "exit 1");

        install
            .cmd()
            .args(["upgrade", "--target", "1.1.0"])
            .assert()
            .code(4)
            .stderr(predicate::str::contains("rolled back"));

        assert_eq!(install.installed(), "1.0.0");
    }

    #[test]
    fn ctrl_c_lets_the_running_hook_finish_then_exits_five() {
        use std::os::unix::process::CommandExt;
        use std::time::{Duration, Instant};

        let install = Install::new("1.0.0", "true");
        let started = install.app_dir().join("started");
        let finished = install.app_dir().join("finished");
        install.write_hook(
            "1.1.0.sh",
            &format!(
                "touch '{}'\nsleep 1\ntouch '{}'",
                started.display(),
                finished.display()
            ),
        );

        // Run devpush as a foreground job would: leader of its own group.
        let mut child = std::process::Command::new(assert_cmd::cargo::cargo_bin!("devpush"))
            .arg("--config")
            .arg(install.config_path())
            .args(["upgrade", "--target", "1.1.0"])
            .env_remove("DEVPUSH_DATA_DIR")
            .env_remove("DEVPUSH_APP_DIR")
            .env_remove("RUST_LOG")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .process_group(0)
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while !started.exists() {
            assert!(Instant::now() < deadline, "hook never started");
            std::thread::sleep(Duration::from_millis(20));
        }

        // What a terminal does on Ctrl-C: SIGINT to the whole foreground group.
        let killed = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -INT -{}", child.id()))
            .status()
            .unwrap();
        assert!(killed.success());

        let status = child.wait().unwrap();
        assert_eq!(status.code(), Some(5));
        assert!(finished.exists(), "hook was interrupted");
        assert_eq!(install.installed(), "1.0.0");
    }

    #[test]
    fn held_lock_exits_three() {
        let install = Install::new("1.0.0", "true");
        let locks = install.data_dir().join("locks");
        fs::create_dir_all(&locks).unwrap();
        let info = serde_json::json!({
            "token": "other-1-0",
            "holder": "other-host",
            "pid": 4242,
            "started_at": Utc::now(),
            "scope": "upgrade",
        });
        fs::write(locks.join("upgrade.lock"), info.to_string()).unwrap();

        install
            .cmd()
            .args(["upgrade", "--target", "1.1.0"])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("other-host"));

        install
            .cmd()
            .args(["upgrade", "--target", "1.1.0", "--force"])
            .assert()
            .success();
    }

    #[test]
    fn downgrade_exits_one() {
        let install = Install::new("2.0.0", "true");

        install
            .cmd()
            .args(["upgrade", "--target", "1.0.0"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("downgrade"));
    }

    #[test]
    fn malformed_target_exits_one() {
        let install = Install::new("1.0.0", "true");

        install
            .cmd()
            .args(["upgrade", "--target", "one.two"])
            .assert()
            .code(1);
        assert_eq!(install.installed(), "1.0.0");
    }
}

mod status {
    use super::*;

    #[test]
    fn shows_installed_version_and_services() {
        let install = Install::new("1.0.0", "true");

        install
            .cmd()
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Installed version: 1.0.0"))
            .stdout(predicate::str::contains("app: never rolled out"))
            .stdout(predicate::str::contains("No upgrade in progress"));
    }

    #[test]
    fn json_status_after_upgrade() {
        let install = Install::new("1.0.0", "true");
        install
            .cmd()
            .args(["-q", "upgrade", "--target", "1.1.0"])
            .assert()
            .success();

        let output = install.cmd().args(["status", "--json"]).output().unwrap();
        assert!(output.status.success());
        let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(status["installed_version"], "1.1.0");
        assert_eq!(status["services"][0]["state"]["phase"], "committed");
        assert!(status["upgrade_lock"].is_null());
    }
}

mod config {
    use super::*;

    #[test]
    fn set_then_get_round_trips_typed_values() {
        let install = Install::new("1.0.0", "true");

        install.cmd().args(["config", "set", "replicas", "3"]).assert().success();
        install
            .cmd()
            .args(["config", "set", "domain", "example.com"])
            .assert()
            .success();

        install
            .cmd()
            .args(["config", "get", "domain"])
            .assert()
            .success()
            .stdout("example.com\n");

        let config = read_json(&install.data_dir().join("config.json"));
        assert_eq!(config["replicas"], 3);
        assert_eq!(config["domain"], "example.com");
    }

    #[test]
    fn set_keeps_existing_keys() {
        let install = Install::new("1.0.0", "true");
        fs::write(
            install.data_dir().join("config.json"),
            r#"{"custom": {"kept": true}}"#,
        )
        .unwrap();

        install
            .cmd()
            .args(["config", "set", "domain", "example.com"])
            .assert()
            .success();

        let output = install.cmd().args(["--json", "config", "get"]).output().unwrap();
        let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(config["custom"]["kept"], true);
        assert_eq!(config["domain"], "example.com");
    }

    #[test]
    fn get_missing_key_prints_nothing() {
        let install = Install::new("1.0.0", "true");
        install
            .cmd()
            .args(["config", "get", "nope"])
            .assert()
            .success()
            .stdout("");
    }
}

#[test]
fn invalid_config_file_fails() {
    let install = Install::new("1.0.0", "true");
    fs::write(install.config_path(), "rollout:\n  waves: []\n").unwrap();

    install
        .cmd()
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("rollout wave"));
}
