//! # relay-runtime
//!
//! The conversation runtime. One loop per conversation reads the model stream,
//! recognizes tool markup as it arrives, validates and dispatches tool calls, and
//! spawns child conversations for fanned-out sub-tasks.
//!
//! ## Architecture
//!
//! ```text
//!   client command ──► Runtime ──► ConversationRepository
//!                         │
//!                         ▼
//!                 StreamOrchestrator (one per conversation)
//!                  │        │          │
//!                  ▼        ▼          ▼
//!        StreamingTagParser │    ToolRegistry ──► Tool::invoke(ToolContext)
//!                    ParamParser                     │
//!                                                    ├─► SandboxPool
//!                                                    └─► sub-tasks (new orchestrators)
//!                         │
//!                         ▼
//!                    Broadcaster ──► MemoryStore + live connections
//! ```

pub mod broadcaster;
pub mod conversation;
pub(crate) mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod runtime;
pub mod sandbox;
pub mod tag_parser;
pub(crate) mod tasks;
pub mod tools;
pub mod xml_params;

pub use broadcaster::{Broadcaster, ChannelConnection, Connection};
pub use conversation::{Conversation, ConversationRepository};
pub use registry::{
    ASK_FOLLOWUP_QUESTION, COMPLETION_RESULT, RESERVED_TAGS, THINK, Tool, ToolContext, ToolOutput,
    ToolRegistry, reserved_specs,
};
pub use runtime::Runtime;
pub use sandbox::{LocalSandbox, LocalSandboxFactory, SandboxPool};
pub use tag_parser::{ParserEvent, StreamingTagParser};
pub use xml_params::{ParamParser, ParseMode, complete_partial_xml, map_and_validate_params};
