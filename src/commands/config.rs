// ABOUTME: Config command implementation.
// ABOUTME: Reads and merges keys of the persisted config.json document.

use devpush::config::Config;
use devpush::error::Result;
use devpush::output::Output;
use devpush::privilege::PrivilegeGate;
use devpush::state::{Document, StateStore};
use serde_json::Value;
use std::sync::Arc;

fn store(config: &Config) -> StateStore {
    let gate: Arc<dyn PrivilegeGate> = Arc::new(config.privilege.gate(config.app_owner));
    StateStore::new(gate, &config.data_dir)
}

/// Print the whole document, or one key. A missing key prints nothing in
/// text mode and `null` in JSON mode.
pub async fn config_get(config: Config, key: Option<&str>, output: Output) -> Result<()> {
    let document = store(&config).config().await?;
    let value = match key {
        Some(key) => document.get(key).cloned().unwrap_or(Value::Null),
        None => Value::Object(document),
    };

    output.document(&value);
    match &value {
        Value::Null => {}
        Value::String(s) => output.line(s),
        other => output.line(&serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

/// Merge one key into the document. `value` is parsed as JSON when it can be,
/// so `config set replicas 3` stores a number and `config set domain x.io` a string.
pub async fn config_set(config: Config, key: &str, value: &str, output: Output) -> Result<()> {
    let parsed = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()));
    let mut patch = Document::new();
    patch.insert(key.to_string(), parsed);

    let document = store(&config).merge_config(patch).await?;
    output.document(&document);
    output.success(&format!("Set {key}"));
    Ok(())
}
