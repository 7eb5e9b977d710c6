use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque conversation identity. Also used as the `taskId` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Allocate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a conversation is a top-level task or a spawned sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Main,
    Sub,
}

/// Execution status of a conversation.
///
/// `idle → streaming → {tool_executing → streaming}* → {completed | aborted | error}`;
/// `idle` is re-entered from a terminal state when new user input arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Idle,
    Streaming,
    ToolExecuting,
    Completed,
    Aborted,
    Error,
}

impl ConversationStatus {
    /// Completed or aborted: nothing is running and the cascade leaves it alone.
    pub fn is_settled(self) -> bool {
        matches!(self, ConversationStatus::Completed | ConversationStatus::Aborted)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConversationStatus::Completed | ConversationStatus::Aborted | ConversationStatus::Error
        )
    }
}

/// Milliseconds since the Unix epoch, assigned by the server.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
