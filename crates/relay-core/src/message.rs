use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::now_millis;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Control type tag carried by every message in a conversation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Message,
    Think,
    Tool,
    UserSendMessage,
    Interrupt,
    CompletionResult,
    AskFollowupQuestion,
    System,
}

/// One entry of a conversation's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub partial: bool,
    /// Server-assigned timestamp in milliseconds. Zero until appended to a log.
    #[serde(default)]
    pub update_time: i64,
    /// Richer structured payload (parsed tool params, tool result, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<Value>,
}

impl ChatMessage {
    pub fn new(role: Role, message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            message_type,
            partial: false,
            update_time: 0,
            original: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, MessageType::UserSendMessage, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, MessageType::System, content)
    }

    pub fn assistant(message_type: MessageType, content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, message_type, content)
    }

    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn with_original(mut self, original: Value) -> Self {
        self.original = Some(original);
        self
    }

    /// True when the message carries nothing worth persisting or broadcasting.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.original.is_none()
    }

    /// Whether `next` should overwrite `self` in place instead of being appended.
    pub fn is_coalesced_by(&self, next: &ChatMessage) -> bool {
        self.partial && self.role == next.role && self.message_type == next.message_type
    }
}

/// Append `item` to `items`, overwriting a trailing partial entry in the same slot.
///
/// Returns the timestamp the stored entry ends up with. An overwrite keeps the
/// timestamp of the entry it replaces.
pub fn append_coalescing<T>(
    items: &mut Vec<T>,
    mut item: T,
    same_slot: impl Fn(&T, &T) -> bool,
    timestamp: impl Fn(&mut T) -> &mut i64,
) -> i64 {
    if let Some(last) = items.last_mut()
        && same_slot(last, &item)
    {
        let ts = *timestamp(last);
        *timestamp(&mut item) = ts;
        *last = item;
        return ts;
    }
    let ts = now_millis();
    *timestamp(&mut item) = ts;
    items.push(item);
    ts
}

/// Ordered message log of one conversation.
///
/// At most one trailing message is partial: a message with the same role and type
/// as a partial trailing message replaces it rather than being appended, and any
/// other message finalizes it. A stream cut off by an interrupt leaves its text
/// in the log as a regular message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Append with partial coalescing, returning the stored message.
    pub fn push(&mut self, message: ChatMessage) -> &ChatMessage {
        if let Some(last) = self.messages.last_mut()
            && last.partial
            && !last.is_coalesced_by(&message)
        {
            last.partial = false;
        }
        append_coalescing(
            &mut self.messages,
            message,
            |last, next| last.is_coalesced_by(next),
            |m| &mut m.update_time,
        );
        // append_coalescing always leaves an element behind
        &self.messages[self.messages.len() - 1]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}
