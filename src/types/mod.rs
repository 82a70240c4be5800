//! Core types shared across the crate.
//!
//! - **IDs**: Strongly-typed identifiers (BindingId, OwnerId, ManagerId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Observability settings and default event options

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, ENV_JSON_LOGS, ENV_LOG_LEVEL};
pub use errors::{Error, Result};
pub use ids::{BindingId, ManagerId, OwnerId, TransitionToken};
