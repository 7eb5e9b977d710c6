//! Mock LLM provider for deterministic testing.
//!
//! Streams pre-configured, pre-chunked responses without making any HTTP calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::provider::*;
use relay_core::{RelayError, Result};

/// A mock LLM provider that replays queued responses in order.
///
/// Once the queue is exhausted every further stream stays open, producing
/// nothing, until it is cancelled.
///
/// # Example
/// ```
/// use relay_llm::mock::{MockProvider, MockResponse};
/// let provider = MockProvider::new("test")
///     .with_response(MockResponse::text("<completionResult>hi</completionResult>"));
/// ```
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<LlmRequest>>>,
    name: String,
}

/// A pre-configured response from the mock provider.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    /// Deltas streamed in order.
    pub chunks: Vec<String>,
    /// Sent as a mid-stream error after the chunks.
    pub error: Option<String>,
    /// Returned from `stream()` itself, before any chunk.
    pub open_error: Option<String>,
    /// Keep the stream open after the chunks until cancelled.
    pub hang: bool,
}

impl MockResponse {
    /// Stream `text` in small fixed-size pieces so tags straddle chunk boundaries.
    pub fn text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let chunks = chars
            .chunks(5)
            .map(|c| c.iter().collect::<String>())
            .collect();
        Self {
            chunks,
            ..Default::default()
        }
    }

    /// Stream exactly these deltas.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Fail mid-stream.
    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// Fail to open the stream at all.
    pub fn open_error(msg: &str) -> Self {
        Self {
            open_error: Some(msg.to_string()),
            ..Default::default()
        }
    }

    /// Emit `text` and then stall until cancelled.
    pub fn stalled(text: &str) -> Self {
        Self {
            hang: true,
            ..Self::text(text)
        }
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(vec![])),
            name: name.into(),
        }
    }

    /// Queue a response.
    pub fn with_response(self, response: MockResponse) -> Self {
        self.responses.lock().push_back(response);
        self
    }

    /// Queue a plain text response.
    pub fn with_text(self, text: &str) -> Self {
        self.with_response(MockResponse::text(text))
    }

    /// Queue a response while the provider is already shared.
    pub fn queue_response(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    /// Get all requests that were made to this provider.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    fn next_response(&self) -> MockResponse {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| MockResponse {
                hang: true,
                ..Default::default()
            })
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        self.requests.lock().push(request.clone());
        let mock = self.next_response();

        if let Some(error) = mock.open_error {
            return Err(RelayError::LlmProvider(error));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for chunk in mock.chunks {
                if cancel.is_cancelled() || tx.send(StreamChunk::TextDelta(chunk)).await.is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }
            if let Some(error) = mock.error {
                let _ = tx.send(StreamChunk::Error(error)).await;
                return;
            }
            if mock.hang {
                cancel.cancelled().await;
                return;
            }
            let _ = tx.send(StreamChunk::Done).await;
        });

        Ok(rx)
    }
}
