//! # relay-llm
//!
//! Abstraction layer over streaming LLM providers. The runtime only needs a
//! cancellable stream of text deltas over the full message log.

pub mod mock;
pub mod openai;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use provider::{LlmProvider, LlmRequest, StreamChunk};
