//! # relay-memory
//!
//! Persistence for conversations. Every conversation owns two JSON documents
//! under the storage root:
//!
//! - **original**: the model-facing message log (`ChatMessage[]`), plus the parent
//!   id and the tool names a sub-task was bound to.
//! - **front-end**: the wire events a reconnecting client replays (`ServerEvent[]`).
//!
//! Both are appended with partial-message coalescing and saved atomically.

pub mod document;
pub mod store;

pub use document::{FrontendDocument, OriginalDocument, last_of_type};
pub use store::{MemoryStore, TaskMemory};
