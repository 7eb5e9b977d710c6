use thiserror::Error;

/// Unified error type for the entire Relay runtime.
#[derive(Error, Debug)]
pub enum RelayError {
    // ── LLM errors ─────────────────────────────────────────────
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    /// The in-flight request was aborted by an interrupt. Not a failure.
    #[error("request cancelled")]
    Cancelled,

    // ── Tool errors ────────────────────────────────────────────
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {tool}: {reason}")]
    ToolExecution { tool: String, reason: String },

    #[error("missing required parameters: [{}]", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("markup parse error: {0}")]
    Parse(String),

    // ── Conversation errors ────────────────────────────────────
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("sub-task failed: {task_id}: {reason}")]
    SubTask { task_id: String, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // ── Sandbox errors ─────────────────────────────────────────
    #[error("sandbox error: {0}")]
    Sandbox(String),

    // ── Memory errors ──────────────────────────────────────────
    #[error("memory error: {0}")]
    Memory(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RelayError {
    /// Whether this error was triggered by an interrupt rather than a real failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
