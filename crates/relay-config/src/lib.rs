//! # relay-config
//!
//! Configuration system for the Relay runtime. Reads from `relay.toml`, environment
//! variables, and CLI overrides, in that precedence order.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::RelayConfig;
pub use schema::{ConfigWarning, WarningSeverity};
