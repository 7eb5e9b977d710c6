//! # relay-cli
//!
//! Command-line interface for the Relay runtime.
//!
//! ## Commands
//!
//! - `relay start`: serve the WebSocket endpoint
//! - `relay run "<prompt>"`: run one task headless and print its events
//! - `relay sessions`: list stored top-level tasks
//! - `relay config`: show the effective configuration
//! - `relay doctor`: validate the configuration

pub mod commands;

pub use commands::Cli;
