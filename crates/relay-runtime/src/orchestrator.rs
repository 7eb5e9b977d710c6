//! The per-conversation loop: wait for input, stream one model turn through the
//! tag parser, dispatch the first actionable tag, repeat.

use serde_json::{Value, json};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::{
    ChatMessage, ConversationOverReason, ConversationStatus, MessageType, RelayError, Result,
    ServerEvent,
};
use relay_llm::{LlmRequest, StreamChunk};

use crate::conversation::Conversation;
use crate::registry::{ASK_FOLLOWUP_QUESTION, COMPLETION_RESULT, RESERVED_TAGS, THINK, ToolContext};
use crate::runtime::Runtime;
use crate::tag_parser::{ParserEvent, StreamingTagParser};
use crate::xml_params::{ParseMode, inner_text};

const NO_TOOL_NUDGE: &str = "Your last response did not call a tool. Every response must end \
with exactly one tool call, <completionResult> or <askFollowupQuestion>.";

/// How a single model turn ended.
#[derive(Debug, Clone, PartialEq)]
enum TurnOutcome {
    ToolDone,
    ToolFailed { tag: String, error: String },
    Completed,
    FollowupQuestion,
    NoToolCall,
    Unterminated { tag: String },
    Interrupted,
}

/// Drive `conversation` until it has nothing left to do.
///
/// Boxed so the loop can spawn loops for sub-tasks through tool calls.
pub(crate) fn run_conversation(
    runtime: Runtime,
    conversation: Arc<Conversation>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        loop {
            StreamOrchestrator::new(runtime.clone(), conversation.clone())
                .run()
                .await;
            conversation.loop_stopped();
            // input submitted while the loop was winding down
            if !conversation.has_pending_input() || !conversation.try_start_loop() {
                break;
            }
        }
    })
}

struct StreamOrchestrator {
    runtime: Runtime,
    conversation: Arc<Conversation>,
    consecutive_errors: u32,
    nudges: u32,
    /// Prose accumulated since the last final plain message.
    plain: String,
}

impl StreamOrchestrator {
    fn new(runtime: Runtime, conversation: Arc<Conversation>) -> Self {
        Self {
            runtime,
            conversation,
            consecutive_errors: 0,
            nudges: 0,
            plain: String::new(),
        }
    }

    async fn run(&mut self) {
        let id = self.conversation.id().clone();
        info!(task_id = %id, kind = ?self.conversation.kind(), "conversation loop started");

        loop {
            if self.conversation.is_sub()
                && self.conversation.status().is_terminal()
                && !self.conversation.has_pending_input()
            {
                break;
            }
            if let Err(e) = self.conversation.wait_for_input().await {
                warn!(task_id = %id, error = %e, "input channel closed");
                break;
            }

            match self.run_turn().await {
                Ok(outcome) => {
                    self.consecutive_errors = 0;
                    if let Err(e) = self.handle_outcome(outcome) {
                        error!(task_id = %id, error = %e, "failed to record turn outcome");
                    }
                }
                Err(e) if e.is_cancelled() || self.conversation.is_aborted() => {
                    debug!(task_id = %id, "turn cancelled");
                }
                Err(e) => self.handle_stream_error(e).await,
            }
        }

        info!(task_id = %id, status = ?self.conversation.status(), "conversation loop stopped");
    }

    // ── One turn ───────────────────────────────────────────────

    async fn run_turn(&mut self) -> Result<TurnOutcome> {
        let Some(cancel) = self.conversation.begin_stream() else {
            return Ok(TurnOutcome::Interrupted);
        };
        self.conversation.advance(ConversationStatus::Streaming);

        let result = self.stream_turn(&cancel).await;
        self.plain.clear();
        self.conversation.end_stream();
        // stops the provider when the turn ended on an actionable tag
        cancel.cancel();
        result
    }

    async fn stream_turn(&mut self, cancel: &CancellationToken) -> Result<TurnOutcome> {
        let config = self.runtime.config();
        let request = LlmRequest {
            model: config.agent.model.clone(),
            messages: self.conversation.messages(),
            max_tokens: config.agent.max_tokens,
            temperature: config.agent.temperature,
        };
        debug!(
            task_id = %self.conversation.id(),
            messages = request.messages.len(),
            "opening stream"
        );

        let provider = self.runtime.provider().clone();
        let mut rx = tokio::select! {
            _ = cancel.cancelled() => return Ok(TurnOutcome::Interrupted),
            rx = provider.stream(&request, cancel.clone()) => rx?,
        };

        let labels = self
            .conversation
            .tool_names()
            .iter()
            .cloned()
            .chain(RESERVED_TAGS.iter().map(|t| t.to_string()));
        let mut parser = StreamingTagParser::new(labels);

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(TurnOutcome::Interrupted),
                chunk = rx.recv() => chunk,
            };
            match chunk {
                Some(StreamChunk::TextDelta(delta)) => {
                    for event in parser.feed(&delta) {
                        if let Some(outcome) = self.handle_event(event, cancel).await? {
                            return Ok(outcome);
                        }
                    }
                }
                Some(StreamChunk::Error(e)) => {
                    if cancel.is_cancelled() {
                        return Ok(TurnOutcome::Interrupted);
                    }
                    return Err(RelayError::LlmProvider(e));
                }
                Some(StreamChunk::Done) | None => break,
            }
        }

        if cancel.is_cancelled() {
            return Ok(TurnOutcome::Interrupted);
        }
        for event in parser.finish() {
            if let Some(outcome) = self.handle_event(event, cancel).await? {
                return Ok(outcome);
            }
        }
        self.flush_plain()?;
        Ok(TurnOutcome::NoToolCall)
    }

    async fn handle_event(
        &mut self,
        event: ParserEvent,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>> {
        match event {
            ParserEvent::PlainText { text, partial } => {
                self.plain.push_str(&text);
                if partial {
                    if !self.plain.trim().is_empty() {
                        self.post(
                            ChatMessage::assistant(MessageType::Message, self.plain.clone())
                                .partial(true),
                        )?;
                    }
                } else {
                    self.flush_plain()?;
                }
                Ok(None)
            }
            ParserEvent::ToolCallPartial { name, buffer } => {
                self.post(self.tag_message(&name, &buffer, ParseMode::Partial).partial(true))?;
                Ok(None)
            }
            ParserEvent::ToolCallFull { name, span } => self.dispatch(&name, &span, cancel).await,
            ParserEvent::LeftOver { text, in_tag: None } => {
                self.plain.push_str(&text);
                self.flush_plain()?;
                Ok(None)
            }
            ParserEvent::LeftOver {
                text,
                in_tag: Some(tag),
            } => {
                self.flush_plain()?;
                if tag == THINK {
                    self.post(ChatMessage::assistant(MessageType::Think, inner_text(&text, THINK)))?;
                    return Ok(None);
                }
                let message = self.tag_message(&tag, &text, ParseMode::Partial);
                let original = merge(
                    message.original.clone(),
                    json!({ "tool": tag, "error": "tag was not closed" }),
                );
                self.post(message.with_original(original))?;
                Ok(Some(TurnOutcome::Unterminated { tag }))
            }
        }
    }

    async fn dispatch(
        &mut self,
        name: &str,
        span: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TurnOutcome>> {
        debug!(task_id = %self.conversation.id(), tag = name, "tag complete");
        match name {
            THINK => {
                self.post(ChatMessage::assistant(MessageType::Think, inner_text(span, THINK)))?;
                Ok(None)
            }
            COMPLETION_RESULT => {
                self.post(self.tag_message(name, span, ParseMode::Final))?;
                Ok(Some(TurnOutcome::Completed))
            }
            ASK_FOLLOWUP_QUESTION => {
                self.post(self.tag_message(name, span, ParseMode::Final))?;
                Ok(Some(TurnOutcome::FollowupQuestion))
            }
            tool => self.execute_tool(tool, span, cancel).await.map(Some),
        }
    }

    async fn execute_tool(
        &self,
        name: &str,
        span: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let id = self.conversation.id().clone();
        self.conversation.advance(ConversationStatus::ToolExecuting);

        let runtime = self.runtime.clone();
        let registry = runtime.registry();
        let Some(spec) = registry.get(name).map(|t| t.spec()) else {
            return self.tool_failed(name, span, None, RelayError::ToolNotFound(name.into()));
        };
        let params = match runtime.params().parse(span, &spec, ParseMode::Final) {
            Ok(params) => params,
            Err(e) => return self.tool_failed(name, span, None, e),
        };

        info!(task_id = %id, tool = name, "invoking tool");
        let ctx = ToolContext::new(runtime.clone(), self.conversation.clone(), cancel.clone());
        match registry.invoke(name, params.clone(), ctx).await {
            Ok(_) if cancel.is_cancelled() => Ok(TurnOutcome::Interrupted),
            Ok(output) => {
                self.post(
                    ChatMessage::assistant(MessageType::Tool, span).with_original(json!({
                        "tool": name,
                        "params": params,
                        "result": output.data,
                        "summary": output.summary,
                    })),
                )?;
                self.post(ChatMessage::system(format!(
                    "[{name}] result:\n{}",
                    output.summary
                )))?;
                self.conversation.advance(ConversationStatus::Streaming);
                debug!(task_id = %id, tool = name, "tool finished");
                Ok(TurnOutcome::ToolDone)
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => Ok(TurnOutcome::Interrupted),
            Err(e) => self.tool_failed(name, span, Some(params), e),
        }
    }

    /// Close the tool's echo with the error attached. No result is recorded.
    fn tool_failed(
        &self,
        name: &str,
        span: &str,
        params: Option<Value>,
        error: RelayError,
    ) -> Result<TurnOutcome> {
        warn!(task_id = %self.conversation.id(), tool = name, error = %error, "tool call failed");
        let mut original = json!({ "tool": name, "error": error.to_string() });
        if let Some(params) = params {
            original["params"] = params;
        }
        self.post(ChatMessage::assistant(MessageType::Tool, span).with_original(original))?;
        Ok(TurnOutcome::ToolFailed {
            tag: name.to_string(),
            error: error.to_string(),
        })
    }

    // ── After a turn ───────────────────────────────────────────

    fn handle_outcome(&mut self, outcome: TurnOutcome) -> Result<()> {
        if outcome != TurnOutcome::NoToolCall {
            self.nudges = 0;
        }
        match outcome {
            TurnOutcome::ToolDone | TurnOutcome::Interrupted => Ok(()),
            TurnOutcome::ToolFailed { tag, error } => {
                self.post(ChatMessage::system(format!(
                    "The <{tag}> call failed: {error}\nFix the call and try again, or choose another tool."
                )))?;
                self.conversation.advance(ConversationStatus::Streaming);
                Ok(())
            }
            TurnOutcome::Unterminated { tag } => {
                self.post(ChatMessage::system(format!(
                    "Your <{tag}> tag was never closed. Repeat the call with a closing </{tag}>."
                )))?;
                Ok(())
            }
            TurnOutcome::NoToolCall => {
                self.nudges += 1;
                let limit = self.runtime.config().runtime.max_no_tool_nudges;
                if self.nudges >= limit {
                    info!(task_id = %self.conversation.id(), nudges = self.nudges, "yielding to user after plain-text turns");
                    self.nudges = 0;
                    return self.yield_to_user(ConversationOverReason::NoToolCall);
                }
                self.post(ChatMessage::system(NO_TOOL_NUDGE))?;
                Ok(())
            }
            TurnOutcome::Completed => {
                if self.conversation.advance(ConversationStatus::Completed) {
                    self.conversation.clear_pending_input();
                    if !self.conversation.is_sub() {
                        self.conversation_over(ConversationOverReason::CompletionResult);
                    }
                }
                Ok(())
            }
            TurnOutcome::FollowupQuestion => {
                self.yield_to_user(ConversationOverReason::AskFollowupQuestion)
            }
        }
    }

    /// Stop and wait for the user. A sub-task has no user, so it completes and
    /// its parent picks up whatever it said last.
    fn yield_to_user(&mut self, reason: ConversationOverReason) -> Result<()> {
        let status = if self.conversation.is_sub() {
            ConversationStatus::Completed
        } else {
            ConversationStatus::Idle
        };
        if self.conversation.advance(status) {
            self.conversation.clear_pending_input();
            self.conversation_over(reason);
        }
        Ok(())
    }

    async fn handle_stream_error(&mut self, e: RelayError) {
        let id = self.conversation.id().clone();
        self.consecutive_errors += 1;
        let limit = self.runtime.config().runtime.max_consecutive_errors;
        warn!(task_id = %id, error = %e, attempt = self.consecutive_errors, "stream failed");
        self.runtime.broadcaster().broadcast(
            &id,
            &ServerEvent::Error {
                task_id: Some(id.clone()),
                message: e.to_string(),
            },
        );

        if self.consecutive_errors >= limit {
            error!(task_id = %id, errors = self.consecutive_errors, "giving up until new input");
            self.consecutive_errors = 0;
            let alert = ServerEvent::Alert {
                task_id: id.clone(),
                message: format!("The model failed {limit} times in a row: {e}"),
            };
            if let Err(e) = self.runtime.broadcaster().record_event(&self.conversation, alert) {
                error!(task_id = %id, error = %e, "failed to record alert");
            }
            if self.conversation.advance(ConversationStatus::Error) {
                self.conversation.clear_pending_input();
                self.conversation_over(ConversationOverReason::Alert);
            }
            return;
        }

        let backoff = self.runtime.config().runtime.retry_backoff_ms * self.consecutive_errors as u64;
        if backoff > 0 {
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
    }

    // ── Helpers ────────────────────────────────────────────────

    /// Echo message for a tag span: its display text plus whatever parameters
    /// can be recovered from it so far.
    fn tag_message(&self, name: &str, span: &str, mode: ParseMode) -> ChatMessage {
        let spec = self
            .runtime
            .reserved()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .or_else(|| self.runtime.registry().get(name).map(|t| t.spec()));
        let params = spec
            .and_then(|spec| self.runtime.params().parse(span, &spec, mode).ok())
            .unwrap_or(Value::Null);

        let text_field = |field: &str| {
            params
                .get(field)
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|| inner_text(span, name).to_string())
        };
        match name {
            COMPLETION_RESULT => {
                let result = text_field("result");
                ChatMessage::assistant(MessageType::CompletionResult, result.clone())
                    .with_original(json!({ "result": result }))
            }
            ASK_FOLLOWUP_QUESTION => {
                let question = text_field("question");
                ChatMessage::assistant(MessageType::AskFollowupQuestion, question.clone())
                    .with_original(json!({ "question": question }))
            }
            THINK => ChatMessage::assistant(MessageType::Think, inner_text(span, THINK)),
            tool => ChatMessage::assistant(MessageType::Tool, span)
                .with_original(json!({ "tool": tool, "params": params })),
        }
    }

    fn flush_plain(&mut self) -> Result<()> {
        let text = std::mem::take(&mut self.plain);
        self.post(ChatMessage::assistant(MessageType::Message, text))
    }

    fn post(&self, message: ChatMessage) -> Result<()> {
        self.runtime
            .broadcaster()
            .post_message(&self.conversation, message)?;
        Ok(())
    }

    fn conversation_over(&self, reason: ConversationOverReason) {
        let id = self.conversation.id();
        info!(task_id = %id, ?reason, "conversation over");
        self.runtime.broadcaster().broadcast(
            id,
            &ServerEvent::ConversationOver {
                task_id: id.clone(),
                reason,
            },
        );
    }
}

fn merge(base: Option<Value>, extra: Value) -> Value {
    match (base, extra) {
        (Some(Value::Object(mut base)), Value::Object(extra)) => {
            base.extend(extra);
            Value::Object(base)
        }
        (_, extra) => extra,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_overlays_fields() {
        let merged = merge(
            Some(json!({ "tool": "bash", "params": { "command": "ls" } })),
            json!({ "error": "tag was not closed" }),
        );
        assert_eq!(merged["params"]["command"], "ls");
        assert_eq!(merged["error"], "tag was not closed");
        assert_eq!(merge(None, json!({ "a": 1 })), json!({ "a": 1 }));
    }
}
