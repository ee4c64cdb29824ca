// ABOUTME: Shell commands backing the provisioning and routing collaborators.
// ABOUTME: Each runs under `sh -c` with the service, generation, and version in the environment.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionerConfig {
    /// Starts a generation.
    #[serde(default = "default_start")]
    pub start: String,

    /// Probes a generation: exit 0 healthy, 75 starting, anything else unhealthy.
    #[serde(default = "default_health")]
    pub health: String,

    /// Stops and removes a generation.
    #[serde(default = "default_stop")]
    pub stop: String,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            health: default_health(),
            stop: default_stop(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Points traffic for the service at the generation.
    #[serde(default = "default_switch")]
    pub switch: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            switch: default_switch(),
        }
    }
}

fn default_start() -> String {
    r#"docker compose -p "$DEVPUSH_GENERATION" up -d --no-deps "$DEVPUSH_SERVICE""#.to_string()
}

fn default_health() -> String {
    r#"docker compose -p "$DEVPUSH_GENERATION" ps --status running --quiet "$DEVPUSH_SERVICE" | grep -q ."#
        .to_string()
}

fn default_stop() -> String {
    r#"docker compose -p "$DEVPUSH_GENERATION" down --remove-orphans"#.to_string()
}

fn default_switch() -> String {
    r#"printf '%s\n' "$DEVPUSH_GENERATION" > "$DEVPUSH_DATA_DIR/active-$DEVPUSH_SERVICE""#
        .to_string()
}
