//! # relay-core
//!
//! Core types, traits, and primitives for the Relay agent-conversation runtime.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! conversation identities, the chat message log, the wire envelope, tool parameter
//! schemas, and the isolated-execution contract.

pub mod error;
pub mod event;
pub mod message;
pub mod sandbox;
pub mod tool;
pub mod types;

pub use error::{RelayError, Result};
pub use event::{
    ClientCommand, ConversationOverReason, MessagePayload, ServerEvent, SessionSummary, SubTaskPhase,
};
pub use message::{ChatMessage, MessageLog, MessageType, Role, append_coalescing};
pub use sandbox::{Sandbox, SandboxFactory};
pub use tool::{ParamDefinition, ParamKind, ToolSpec};
pub use types::*;
