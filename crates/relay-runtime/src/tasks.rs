//! Sub-task trees: spawning children, waiting on them, and cascading interrupts.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use relay_core::{
    ChatMessage, ConversationId, ConversationOverReason, ConversationStatus, MessageType,
    RelayError, Result, Role, ServerEvent, SubTaskPhase, now_millis,
};
use relay_memory::last_of_type;

use crate::conversation::Conversation;
use crate::runtime::Runtime;

pub(crate) const INTERRUPT_NOTICE: &str = "The task was interrupted by the user.";

/// Split `requested` into the names the caller may delegate and the ones it may not.
/// An empty request inherits the caller's whole tool set.
pub(crate) fn filter_tools(available: &[String], requested: &[String]) -> (Vec<String>, Vec<String>) {
    if requested.is_empty() {
        return (available.to_vec(), Vec::new());
    }
    requested
        .iter()
        .cloned()
        .partition(|name| available.contains(name))
}

/// Result text of a finished sub-task: the last `completionResult`, else the
/// last message of any kind.
pub(crate) fn extract_result(messages: &[ChatMessage]) -> String {
    if let Some(done) = last_of_type(messages, MessageType::CompletionResult) {
        let result = done
            .original
            .as_ref()
            .and_then(|o| o.get("result"))
            .and_then(|r| r.as_str())
            .filter(|r| !r.trim().is_empty());
        return result.unwrap_or(done.content.as_str()).to_string();
    }
    messages
        .last()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

impl Runtime {
    /// Create a child of `parent` bound to `tools`, announce it, and start its loop.
    pub(crate) fn start_sub_task(
        &self,
        parent: &Arc<Conversation>,
        prompt: &str,
        tools: Vec<String>,
        index: usize,
    ) -> Result<Arc<Conversation>> {
        let sub = self.create_conversation(Some(parent), tools)?;
        self.broadcaster().record_event(
            parent,
            sub_task_event(parent.id(), sub.id(), index, SubTaskPhase::Created, prompt),
        )?;
        self.submit_input(&sub, prompt)?;
        self.ensure_loop(&sub);
        info!(
            task_id = %parent.id(),
            sub_task_id = %sub.id(),
            index,
            "sub-task started"
        );
        Ok(sub)
    }

    /// Block until `sub` finishes, is aborted or errors, bounded by the configured
    /// timeout and by `cancel`. Returns the extracted result.
    pub(crate) async fn await_sub_task(
        &self,
        parent: &Arc<Conversation>,
        sub: &Arc<Conversation>,
        prompt: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let limit = Duration::from_secs(self.config().runtime.subtask_timeout_secs);
        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            res = tokio::time::timeout(limit, sub.wait_for_status(|s| s.is_terminal())) => Some(res),
        };

        let outcome = match waited {
            None => {
                self.abandon(sub).await;
                Err(RelayError::Cancelled)
            }
            Some(Err(_)) => {
                warn!(sub_task_id = %sub.id(), timeout_secs = limit.as_secs(), "sub-task timed out");
                self.abandon(sub).await;
                Err(RelayError::SubTask {
                    task_id: sub.id().to_string(),
                    reason: format!("timed out after {}s", limit.as_secs()),
                })
            }
            Some(Ok(ConversationStatus::Completed)) => Ok(extract_result(&sub.messages())),
            Some(Ok(status)) => Err(RelayError::SubTask {
                task_id: sub.id().to_string(),
                reason: format!("ended with status {status:?}"),
            }),
        };

        self.sandboxes().release(sub.root_id(), sub.id()).await;

        let phase = if outcome.is_ok() {
            SubTaskPhase::Completed
        } else {
            SubTaskPhase::Failed
        };
        // an aborted parent records nothing further, like post_message
        if parent.is_aborted() {
            debug!(
                task_id = %parent.id(),
                sub_task_id = %sub.id(),
                ?phase,
                "parent aborted, update dropped"
            );
        } else {
            self.broadcaster().record_event(
                parent,
                sub_task_event(parent.id(), sub.id(), index, phase, prompt),
            )?;
        }
        info!(sub_task_id = %sub.id(), ?phase, "sub-task finished");
        outcome
    }

    async fn abandon(&self, sub: &Arc<Conversation>) {
        if let Err(e) = self.interrupt(sub.id()).await {
            warn!(sub_task_id = %sub.id(), error = %e, "failed to interrupt sub-task");
        }
    }

    /// Run one child conversation to completion and return its result.
    pub async fn run_sub_task(
        &self,
        parent: &Arc<Conversation>,
        prompt: String,
        tools: Vec<String>,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let sub = self.start_sub_task(parent, &prompt, tools, index)?;
        self.await_sub_task(parent, &sub, &prompt, index, cancel)
            .await
    }

    /// Client-initiated sub-task. Returns the child's id immediately; its result
    /// lands in the parent's log as a system message once it finishes.
    pub fn call_sub_task(
        &self,
        parent_id: &ConversationId,
        prompt: &str,
        tools: &[String],
    ) -> Result<ConversationId> {
        let parent = self.load_task(parent_id)?;
        let (kept, dropped) = filter_tools(parent.tool_names(), tools);
        if !dropped.is_empty() {
            warn!(task_id = %parent_id, ?dropped, "ignoring tools the parent cannot delegate");
        }
        let index = self.repository().children_of(parent_id).len();
        let sub = self.start_sub_task(&parent, prompt, kept, index)?;
        let sub_id = sub.id().clone();

        let runtime = self.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let summary = match runtime
                .await_sub_task(&parent, &sub, &prompt, index, &cancel)
                .await
            {
                Ok(result) => format!("[sub-task {}] result:\n{result}", sub.id()),
                Err(e) => format!("[sub-task {}] failed: {e}", sub.id()),
            };
            if let Err(e) = runtime
                .broadcaster()
                .post_message(&parent, ChatMessage::system(summary))
            {
                warn!(task_id = %parent.id(), error = %e, "failed to record sub-task result");
            }
        });
        Ok(sub_id)
    }

    /// Abort `id` and every unsettled descendant.
    ///
    /// Boxed because it recurses through the task tree.
    pub fn interrupt<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let conversation = self.load_task(id)?;
            // only the caller that raises the flag posts the notice
            if !conversation.status().is_settled() && conversation.try_abort() {
                conversation.cancel_stream();
                self.broadcaster().post_message_forced(
                    &conversation,
                    ChatMessage::new(Role::User, MessageType::Interrupt, INTERRUPT_NOTICE),
                )?;
                conversation.set_status(ConversationStatus::Aborted);
                conversation.clear_pending_input();
                self.broadcaster().broadcast(
                    id,
                    &ServerEvent::ConversationOver {
                        task_id: id.clone(),
                        reason: ConversationOverReason::Interrupt,
                    },
                );
                info!(task_id = %id, "conversation interrupted");
            }

            for child in self.repository().children_of(id) {
                if !child.status().is_settled() {
                    self.interrupt(child.id()).await?;
                }
            }
            Ok(())
        })
    }
}

fn sub_task_event(
    parent: &ConversationId,
    sub: &ConversationId,
    index: usize,
    status: SubTaskPhase,
    prompt: &str,
) -> ServerEvent {
    ServerEvent::AssignTaskUpdated {
        task_id: parent.clone(),
        sub_task_id: sub.clone(),
        index,
        status,
        prompt: prompt.to_string(),
        update_time: now_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_tools_inherits_when_empty() {
        let (kept, dropped) = filter_tools(&names(&["bash", "assignTasks"]), &[]);
        assert_eq!(kept, names(&["bash", "assignTasks"]));
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_filter_tools_drops_unknown() {
        let (kept, dropped) = filter_tools(&names(&["bash"]), &names(&["bash", "browser"]));
        assert_eq!(kept, names(&["bash"]));
        assert_eq!(dropped, names(&["browser"]));
    }

    #[test]
    fn test_extract_result_prefers_structured_result() {
        let messages = vec![
            ChatMessage::assistant(MessageType::Message, "working"),
            ChatMessage::assistant(MessageType::CompletionResult, "<completionResult>…")
                .with_original(json!({ "result": "3 files" })),
            ChatMessage::system("trailing"),
        ];
        assert_eq!(extract_result(&messages), "3 files");
    }

    #[test]
    fn test_extract_result_falls_back_to_last_message() {
        let messages = vec![
            ChatMessage::user("do it"),
            ChatMessage::assistant(MessageType::AskFollowupQuestion, "which dir?"),
        ];
        assert_eq!(extract_result(&messages), "which dir?");
        assert_eq!(extract_result(&[]), "");
    }
}
