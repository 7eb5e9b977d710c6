use async_trait::async_trait;
use relay_core::{ChatMessage, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Provider-specific model name.
    pub model: String,
    /// The full conversation log, system seed included.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Content text delta.
    TextDelta(String),
    /// Stream is done.
    Done,
    /// An error occurred mid-stream.
    Error(String),
}

/// Trait implemented by each LLM backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable name, e.g. "openai".
    fn name(&self) -> &str;

    /// Start a streaming completion. Cancelling `cancel` must abort the
    /// in-flight request promptly; the receiver then simply closes.
    async fn stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>>;
}
