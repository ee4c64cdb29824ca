// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to keep generation and lock identifiers apart.

mod id;
mod service_name;

pub use id::{GenerationId, Id, LockId};
pub use service_name::{ServiceName, ServiceNameError};
