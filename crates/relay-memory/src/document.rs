use relay_core::{ChatMessage, ConversationId, MessageLog, MessageType, ServerEvent};
use serde::{Deserialize, Serialize};

/// The model-facing document: everything the LLM sees, in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalDocument {
    pub messages: MessageLog,
    pub task_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub father_task_id: Option<ConversationId>,
    /// Tools a sub-task was bound to, recorded so recovery rebinds the same set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_names: Option<Vec<String>>,
    #[serde(default)]
    pub updated_at: i64,
}

impl OriginalDocument {
    pub fn new(task_id: ConversationId, father_task_id: Option<ConversationId>) -> Self {
        Self {
            messages: MessageLog::new(),
            task_id,
            father_task_id,
            tool_names: None,
            updated_at: 0,
        }
    }

    /// First thing the user asked, used as the session title.
    pub fn title(&self) -> String {
        self.messages
            .messages()
            .iter()
            .find(|m| m.message_type == MessageType::UserSendMessage)
            .map(|m| truncate_title(&m.content))
            .unwrap_or_default()
    }
}

/// The replay document: wire events exactly as clients received them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendDocument {
    pub messages: Vec<ServerEvent>,
    pub task_id: ConversationId,
    #[serde(default)]
    pub updated_at: i64,
}

impl FrontendDocument {
    pub fn new(task_id: ConversationId) -> Self {
        Self {
            messages: vec![],
            task_id,
            updated_at: 0,
        }
    }

    /// Append an event. A message event replaces the latest message event when that
    /// one is a partial of the same kind and role, and finalizes it otherwise.
    /// Non-message events (`assignTaskUpdated`, ...) are appended without
    /// touching the message slot, so a tool call still coalesces across them.
    ///
    /// The event already carries the timestamp of the message it was derived from,
    /// so nothing is restamped here.
    pub fn push(&mut self, event: ServerEvent) {
        if event.payload().is_some()
            && let Some(last) = self
                .messages
                .iter_mut()
                .rev()
                .find(|e| e.payload().is_some())
        {
            if last.is_coalesced_by(&event) {
                *last = event;
                return;
            }
            if let Some(payload) = last.payload_mut() {
                payload.partial = false;
            }
        }
        self.messages.push(event);
    }
}

const TITLE_LEN: usize = 60;

fn truncate_title(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= TITLE_LEN {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_LEN).collect();
    title.push('…');
    title
}

/// Last assistant message of the given type, if any.
pub fn last_of_type(messages: &[ChatMessage], kind: MessageType) -> Option<&ChatMessage> {
    messages
        .iter()
        .rev()
        .find(|m| m.message_type == kind && m.role == relay_core::Role::Assistant)
}
