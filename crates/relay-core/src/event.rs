//! The transport-agnostic wire envelope: `{ "type": ..., "data": ... }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ChatMessage, MessageType, Role};
use crate::types::{ConversationId, ConversationStatus};

/// Payload shared by every message-derived server event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub task_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub partial: bool,
    pub update_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Why a conversation stopped and is now waiting for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationOverReason {
    CompletionResult,
    AskFollowupQuestion,
    Interrupt,
    Alert,
    NoToolCall,
}

/// Lifecycle phase reported in `assignTaskUpdated` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubTaskPhase {
    Created,
    Completed,
    Failed,
}

/// One entry of the `sessionHistories` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub task_id: ConversationId,
    pub title: String,
    pub updated_at: i64,
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<ConversationId>,
        command: String,
    },
    Alert {
        task_id: ConversationId,
        message: String,
    },
    AskFollowupQuestion(MessagePayload),
    AssignTaskUpdated {
        task_id: ConversationId,
        sub_task_id: ConversationId,
        index: usize,
        status: SubTaskPhase,
        prompt: String,
        update_time: i64,
    },
    CompletionResult(MessagePayload),
    Connected {
        connection_id: String,
    },
    ConversationOver {
        task_id: ConversationId,
        reason: ConversationOverReason,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<ConversationId>,
        message: String,
    },
    Interrupt(MessagePayload),
    Message(MessagePayload),
    SessionHistories {
        sessions: Vec<SessionSummary>,
    },
    TaskHistory {
        task_id: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        father_task_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<ConversationStatus>,
        messages: Vec<ServerEvent>,
    },
    Think(MessagePayload),
    Tool(MessagePayload),
}

impl ServerEvent {
    /// Derive the wire event for a persisted log entry. `None` for internal
    /// messages (system context) that clients never see.
    pub fn from_message(task_id: &ConversationId, message: &ChatMessage) -> Option<Self> {
        let payload = MessagePayload {
            task_id: task_id.clone(),
            role: message.role,
            content: message.content.clone(),
            partial: message.partial,
            update_time: message.update_time,
            data: message.original.clone(),
        };
        let event = match message.message_type {
            MessageType::Message | MessageType::UserSendMessage => ServerEvent::Message(payload),
            MessageType::Think => ServerEvent::Think(payload),
            MessageType::Tool => ServerEvent::Tool(payload),
            MessageType::Interrupt => ServerEvent::Interrupt(payload),
            MessageType::CompletionResult => ServerEvent::CompletionResult(payload),
            MessageType::AskFollowupQuestion => ServerEvent::AskFollowupQuestion(payload),
            MessageType::System => return None,
        };
        Some(event)
    }

    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Ack { .. } => "ack",
            ServerEvent::Alert { .. } => "alert",
            ServerEvent::AskFollowupQuestion(_) => "askFollowupQuestion",
            ServerEvent::AssignTaskUpdated { .. } => "assignTaskUpdated",
            ServerEvent::CompletionResult(_) => "completionResult",
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::ConversationOver { .. } => "conversationOver",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Interrupt(_) => "interrupt",
            ServerEvent::Message(_) => "message",
            ServerEvent::SessionHistories { .. } => "sessionHistories",
            ServerEvent::TaskHistory { .. } => "taskHistory",
            ServerEvent::Think(_) => "think",
            ServerEvent::Tool(_) => "tool",
        }
    }

    pub fn payload(&self) -> Option<&MessagePayload> {
        match self {
            ServerEvent::AskFollowupQuestion(p)
            | ServerEvent::CompletionResult(p)
            | ServerEvent::Interrupt(p)
            | ServerEvent::Message(p)
            | ServerEvent::Think(p)
            | ServerEvent::Tool(p) => Some(p),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self) -> Option<&mut MessagePayload> {
        match self {
            ServerEvent::AskFollowupQuestion(p)
            | ServerEvent::CompletionResult(p)
            | ServerEvent::Interrupt(p)
            | ServerEvent::Message(p)
            | ServerEvent::Think(p)
            | ServerEvent::Tool(p) => Some(p),
            _ => None,
        }
    }

    /// Front-end log counterpart of [`ChatMessage::is_coalesced_by`].
    pub fn is_coalesced_by(&self, next: &ServerEvent) -> bool {
        match (self.payload(), next.payload()) {
            (Some(last), Some(new)) => {
                last.partial && self.kind() == next.kind() && last.role == new.role
            }
            _ => false,
        }
    }

    /// Serialize to the JSON text frame sent to clients.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client → server commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    UserSendMessage {
        task_id: ConversationId,
        content: String,
    },
    Interrupt {
        task_id: ConversationId,
    },
    Resume {
        task_id: ConversationId,
    },
    LoadTask {
        task_id: ConversationId,
    },
    LoadSubTask {
        task_id: ConversationId,
    },
    CallSubTask {
        task_id: ConversationId,
        content: String,
        #[serde(default)]
        tools: Vec<String>,
    },
    CreateTask {
        content: String,
    },
}

impl ClientCommand {
    /// The `type` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::UserSendMessage { .. } => "userSendMessage",
            ClientCommand::Interrupt { .. } => "interrupt",
            ClientCommand::Resume { .. } => "resume",
            ClientCommand::LoadTask { .. } => "loadTask",
            ClientCommand::LoadSubTask { .. } => "loadSubTask",
            ClientCommand::CallSubTask { .. } => "callSubTask",
            ClientCommand::CreateTask { .. } => "createTask",
        }
    }

    pub fn task_id(&self) -> Option<&ConversationId> {
        match self {
            ClientCommand::UserSendMessage { task_id, .. }
            | ClientCommand::Interrupt { task_id }
            | ClientCommand::Resume { task_id }
            | ClientCommand::LoadTask { task_id }
            | ClientCommand::LoadSubTask { task_id }
            | ClientCommand::CallSubTask { task_id, .. } => Some(task_id),
            ClientCommand::CreateTask { .. } => None,
        }
    }
}
