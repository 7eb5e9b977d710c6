use async_trait::async_trait;
use std::sync::Arc;

use crate::types::ConversationId;

/// Isolated command-execution backend shared by a root conversation and its descendants.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Prepare the backend. Called once before the first command.
    async fn init(&self) -> crate::Result<()>;

    /// Run a shell command and return combined stdout + stderr.
    async fn run_command(&self, command: &str) -> crate::Result<String>;

    /// Tear the backend down. Called when the last reference is released.
    async fn destroy(&self) -> crate::Result<()>;

    fn is_running(&self) -> bool;
}

/// Creates a sandbox for a given root conversation.
pub trait SandboxFactory: Send + Sync {
    fn create(&self, root: &ConversationId) -> Arc<dyn Sandbox>;
}
