// ABOUTME: Integration tests for upgrade.yml parsing and validation.
// ABOUTME: Tests defaults, durations, rollout waves, and directory overrides from the environment.

use devpush::config::*;
use devpush::error::Error;
use std::path::PathBuf;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.app_dir, PathBuf::from(DEFAULT_APP_DIR));
        assert_eq!(config.hooks_dir(), PathBuf::from("/opt/devpush/scripts/upgrade"));
        assert_eq!(config.lock_dir(), PathBuf::from("/var/lib/devpush/locks"));
        assert_eq!(config.health_timeout, Duration::from_secs(120));
        assert_eq!(config.locks.stale_after, Duration::from_secs(3600));
        assert_eq!(config.drain.grace_period, Duration::from_secs(10));
        assert_eq!(config.privilege.mode, PrivilegeMode::Auto);
        assert!(config.privilege.enforce_app_ownership);

        let waves: Vec<Vec<String>> = config
            .rollout
            .waves
            .iter()
            .map(|wave| wave.iter().map(|s| s.to_string()).collect())
            .collect();
        assert_eq!(waves, vec![vec!["app"], vec!["worker"]]);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
data_dir: /srv/devpush/data
app_dir: /srv/devpush/app
hooks_dir: /srv/devpush/hooks
app_owner:
  uid: 1001
  gid: 1002
privilege:
  mode: elevate
  elevation: [doas]
  enforce_app_ownership: false
locks:
  stale_after: 30m
healthcheck:
  interval: 1s
  max_interval: 8s
  timeout: 3s
  retries: 5
  start_period: 0s
health_timeout: 5m
drain:
  grace_period: 2s
rollout:
  waves:
    - [app, api]
    - [worker]
provisioner:
  start: ./start.sh
  health: ./health.sh
  stop: ./stop.sh
router:
  switch: ./switch.sh
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.hooks_dir(), PathBuf::from("/srv/devpush/hooks"));
        assert_eq!(config.lock_dir(), PathBuf::from("/srv/devpush/data/locks"));
        assert_eq!(config.app_owner.uid, 1001);
        assert_eq!(config.app_owner.gid, 1002);
        assert_eq!(config.privilege.mode, PrivilegeMode::Elevate);
        assert_eq!(config.privilege.elevation, vec!["doas"]);
        assert!(!config.privilege.enforce_app_ownership);
        assert_eq!(config.locks.stale_after, Duration::from_secs(1800));
        assert_eq!(config.healthcheck.interval, Duration::from_secs(1));
        assert_eq!(config.healthcheck.max_interval, Duration::from_secs(8));
        assert_eq!(config.healthcheck.retries, 5);
        assert_eq!(config.healthcheck.start_period, Duration::ZERO);
        assert_eq!(config.health_timeout, Duration::from_secs(300));
        assert_eq!(config.drain.grace_period, Duration::from_secs(2));
        assert_eq!(config.rollout.waves.len(), 2);
        assert_eq!(config.rollout.waves.head.len(), 2);
        assert_eq!(config.provisioner.health, "./health.sh");
        assert_eq!(config.router.switch, "./switch.sh");
    }

    #[test]
    fn default_commands_use_generation_environment() {
        let config = Config::default();
        assert!(config.provisioner.start.contains("$DEVPUSH_GENERATION"));
        assert!(config.router.switch.contains("$DEVPUSH_SERVICE"));
    }
}

mod validation {
    use super::*;

    fn invalid(yaml: &str) -> String {
        match Config::from_yaml(yaml) {
            Err(Error::InvalidConfig(message)) => message,
            Err(Error::Yaml(e)) => e.to_string(),
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_service_in_two_waves() {
        let message = invalid("rollout:\n  waves: [[app], [worker, app]]\n");
        assert!(message.contains("app"), "{message}");
    }

    #[test]
    fn rejects_empty_waves() {
        assert!(invalid("rollout:\n  waves: []\n").contains("at least one"));
        assert!(invalid("rollout:\n  waves: [[app], []]\n").contains("cannot be empty"));
    }

    #[test]
    fn rejects_invalid_service_names() {
        invalid("rollout:\n  waves: [[App_1]]\n");
    }

    #[test]
    fn rejects_backoff_cap_below_interval() {
        let message = invalid("healthcheck:\n  interval: 10s\n  max_interval: 1s\n");
        assert!(message.contains("max_interval"));
    }

    #[test]
    fn rejects_unknown_privilege_mode() {
        invalid("privilege:\n  mode: sometimes\n");
    }

    #[test]
    fn rejects_malformed_duration() {
        invalid("health_timeout: soon\n");
    }
}

mod loading {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_vars_unset([DATA_DIR_ENV, APP_DIR_ENV], || {
            let config = Config::load_or_default(&dir.path().join("upgrade.yml")).unwrap();
            assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        });
    }

    #[test]
    fn environment_overrides_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade.yml");
        std::fs::write(&path, "data_dir: /from/file\napp_dir: /app/from/file\n").unwrap();

        temp_env::with_vars(
            [
                (DATA_DIR_ENV, Some("/from/env")),
                (APP_DIR_ENV, None::<&str>),
            ],
            || {
                let config = Config::load_or_default(&path).unwrap();
                assert_eq!(config.data_dir, PathBuf::from("/from/env"));
                assert_eq!(config.app_dir, PathBuf::from("/app/from/file"));
            },
        );
    }

    #[test]
    fn empty_environment_value_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        temp_env::with_var(DATA_DIR_ENV, Some(""), || {
            let config = Config::load_or_default(&dir.path().join("absent.yml")).unwrap();
            assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        });
    }

    #[test]
    fn unreadable_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upgrade.yml");
        std::fs::write(&path, "rollout: [not, a, map").unwrap();
        assert!(matches!(Config::load_or_default(&path), Err(Error::Yaml(_))));
    }
}
