use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{RelayError, Result, Role};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::*;

/// OpenAI-compatible chat completions provider (works with OpenAI, DeepSeek, vLLM, etc.)
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            provider_name: "openai".into(),
        }
    }

    /// Use a custom base URL (for self-hosted or third-party compatible endpoints).
    pub fn with_base_url(mut self, url: String, name: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self.provider_name = name;
        self
    }

    fn request_body(request: &LlmRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                serde_json::json!({ "role": role, "content": msg.content })
            })
            .collect();

        serde_json::json!({
            "model": &request.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": messages,
            "stream": true,
        })
    }
}

/// Pull the text delta out of one `data:` line. `None` for `[DONE]`.
fn parse_sse_data(data: &str) -> Option<Option<String>> {
    if data.trim() == "[DONE]" {
        return None;
    }
    let text = serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|event| {
            event["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .filter(|t| !t.is_empty());
    Some(text)
}

/// Split off every complete line, trimmed. Bytes after the last `\n` stay
/// buffered, so a character split across network chunks is decoded whole.
fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let Some(last) = buffer.iter().rposition(|b| *b == b'\n') else {
        return vec![];
    };
    let complete: Vec<u8> = buffer.drain(..=last).collect();
    complete
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .collect()
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn stream(
        &self,
        request: &LlmRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamChunk>> {
        let (tx, rx) = mpsc::channel(256);
        let body = Self::request_body(request);

        let send = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send();

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            resp = send => resp.map_err(|e| RelayError::LlmProvider(e.to_string()))?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::LlmProvider(format!("HTTP {status}: {text}")));
        }

        debug!(provider = %self.provider_name, model = %request.model, "stream opened");

        tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("stream cancelled, dropping connection");
                        return;
                    }
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        buffer.extend_from_slice(&bytes);
                        for line in drain_lines(&mut buffer) {
                            if line.is_empty() || line.starts_with(':') {
                                continue;
                            }
                            let Some(data) = line.strip_prefix("data:") else {
                                continue;
                            };
                            match parse_sse_data(data.trim_start()) {
                                None => {
                                    let _ = tx.send(StreamChunk::Done).await;
                                    return;
                                }
                                Some(Some(text)) => {
                                    if tx.send(StreamChunk::TextDelta(text)).await.is_err() {
                                        return;
                                    }
                                }
                                Some(None) => {}
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "stream read failed");
                        let _ = tx.send(StreamChunk::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        // Stream ended without [DONE]
                        let _ = tx.send(StreamChunk::Done).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{ChatMessage, MessageType};

    #[test]
    fn test_parse_sse_text_delta() {
        let line = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_data(line), Some(Some("Hel".to_string())));
    }

    #[test]
    fn test_parse_sse_done() {
        assert_eq!(parse_sse_data("[DONE]"), None);
    }

    #[test]
    fn test_parse_sse_role_only_chunk() {
        let line = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_data(line), Some(None));
    }

    #[test]
    fn test_drain_lines_keeps_split_characters_whole() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"h\u{e9}llo \u{2713}\"}}]}\n";
        let bytes = line.as_bytes();
        let cut = line.find('\u{2713}').unwrap() + 1;

        let mut buffer = bytes[..cut].to_vec();
        assert!(drain_lines(&mut buffer).is_empty());
        buffer.extend_from_slice(&bytes[cut..]);
        let lines = drain_lines(&mut buffer);
        assert!(buffer.is_empty());

        let data = lines[0].strip_prefix("data:").unwrap().trim_start();
        assert_eq!(parse_sse_data(data), Some(Some("h\u{e9}llo \u{2713}".to_string())));
    }

    #[test]
    fn test_drain_lines_leaves_partial_tail() {
        let mut buffer = b"data: a\r\n\ndata: b".to_vec();
        assert_eq!(drain_lines(&mut buffer), vec!["data: a", "", ""]);
        assert_eq!(buffer, b"data: b");
    }

    #[test]
    fn test_request_body_maps_roles() {
        let request = LlmRequest {
            model: "gpt-4o".into(),
            messages: vec![
                ChatMessage::system("seed"),
                ChatMessage::user("list files"),
                ChatMessage::assistant(MessageType::Tool, "<bash><command>ls</command></bash>"),
            ],
            max_tokens: 100,
            temperature: 0.2,
        };
        let body = OpenAiProvider::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][2]["role"], "assistant");
    }
}
