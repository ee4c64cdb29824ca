// ABOUTME: Privilege settings: how the gate reaches root and whether the app tree is chowned.
// ABOUTME: Builds the SystemGate used by the CLI.

use serde::Deserialize;

use crate::privilege::{AppOwner, GateMode, SystemGate};

/// How to reach root for root-owned state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMode {
    /// Root if running as root, else the elevation program if configured.
    #[default]
    Auto,
    /// Operate directly as the invoking user (rootless installs).
    Direct,
    /// Always wrap operations in the elevation program.
    Elevate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrivilegeConfig {
    #[serde(default)]
    pub mode: PrivilegeMode,

    /// Program and arguments used to elevate, e.g. `["sudo", "-n"]`.
    #[serde(default = "default_elevation")]
    pub elevation: Vec<String>,

    /// Chown the app tree to the app owner after hooks.
    #[serde(default = "default_enforce_app_ownership")]
    pub enforce_app_ownership: bool,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            mode: PrivilegeMode::default(),
            elevation: default_elevation(),
            enforce_app_ownership: default_enforce_app_ownership(),
        }
    }
}

impl PrivilegeConfig {
    pub fn gate(&self, owner: AppOwner) -> SystemGate {
        match self.mode {
            PrivilegeMode::Auto => SystemGate::detect(&self.elevation, owner),
            PrivilegeMode::Direct => SystemGate::new(GateMode::Root, owner),
            PrivilegeMode::Elevate => match self.elevation.split_first() {
                Some((program, args)) => SystemGate::new(
                    GateMode::Elevate {
                        program: program.clone(),
                        args: args.to_vec(),
                    },
                    owner,
                ),
                None => SystemGate::new(GateMode::Unavailable, owner),
            },
        }
    }
}

fn default_elevation() -> Vec<String> {
    vec!["sudo".to_string(), "-n".to_string()]
}

fn default_enforce_app_ownership() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mode_operates_as_root() {
        let config = PrivilegeConfig {
            mode: PrivilegeMode::Direct,
            ..PrivilegeConfig::default()
        };
        assert_eq!(config.gate(AppOwner::default()).mode(), &GateMode::Root);
    }

    #[test]
    fn elevate_without_program_is_unavailable() {
        let config = PrivilegeConfig {
            mode: PrivilegeMode::Elevate,
            elevation: vec![],
            ..PrivilegeConfig::default()
        };
        assert_eq!(
            config.gate(AppOwner::default()).mode(),
            &GateMode::Unavailable
        );
    }

    #[test]
    fn elevate_splits_program_and_args() {
        let config = PrivilegeConfig {
            mode: PrivilegeMode::Elevate,
            ..PrivilegeConfig::default()
        };
        assert_eq!(
            config.gate(AppOwner::default()).mode(),
            &GateMode::Elevate {
                program: "sudo".to_string(),
                args: vec!["-n".to_string()],
            }
        );
    }
}
