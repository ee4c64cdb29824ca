// ABOUTME: Library root for devpush - exposes the upgrade orchestrator and its building blocks.
// ABOUTME: The main binary is in main.rs.

pub mod abort;
pub mod atomic;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod flock;
pub mod hooks;
pub mod lock;
pub mod output;
pub mod privilege;
pub mod rollout;
pub mod state;
pub mod types;
pub mod upgrade;
pub mod version;
