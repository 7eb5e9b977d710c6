//! Fan-out of conversation events to live connections.
//!
//! [`Broadcaster::post_message`] is the single path model and tool output takes:
//! append to the original document, derive the wire event from the stored copy
//! (so both carry the same timestamp), append that to the front-end document,
//! save, then send.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relay_core::{ChatMessage, ConversationId, Result, ServerEvent};

use crate::conversation::Conversation;

/// A transport-level handle that accepts serialized envelopes.
pub trait Connection: Send + Sync {
    fn id(&self) -> &str;

    /// Deliver one text frame. Returns false once the peer is gone.
    fn send(&self, frame: &str) -> bool;
}

/// Connection backed by an unbounded channel; the transport drains the receiver.
pub struct ChannelConnection {
    id: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelConnection {
    pub fn new(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id: id.into(), tx }, rx)
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, frame: &str) -> bool {
        self.tx.send(frame.to_string()).is_ok()
    }
}

/// Conversation id → connections currently viewing it.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: DashMap<ConversationId, Vec<Arc<dyn Connection>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `connection` at `id`. A connection views one conversation at a time,
    /// so any previous subscription is dropped.
    pub fn subscribe(&self, id: &ConversationId, connection: Arc<dyn Connection>) {
        self.disconnect(connection.id());
        debug!(task_id = %id, connection = connection.id(), "connection subscribed");
        self.subscribers
            .entry(id.clone())
            .or_default()
            .push(connection);
    }

    /// Remove `connection_id` from every conversation.
    pub fn disconnect(&self, connection_id: &str) {
        for mut entry in self.subscribers.iter_mut() {
            entry.retain(|c| c.id() != connection_id);
        }
        self.subscribers.retain(|_, conns| !conns.is_empty());
    }

    pub fn subscriber_count(&self, id: &ConversationId) -> usize {
        self.subscribers.get(id).map(|c| c.len()).unwrap_or(0)
    }

    /// Send `event` to every connection on `id`, pruning dead ones.
    pub fn broadcast(&self, id: &ConversationId, event: &ServerEvent) {
        let Some(connections) = self.subscribers.get(id).map(|c| c.clone()) else {
            return;
        };
        let frame = match event.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(task_id = %id, error = %e, "failed to serialize event");
                return;
            }
        };

        let dead: Vec<String> = connections
            .iter()
            .filter(|c| !c.send(&frame))
            .map(|c| c.id().to_string())
            .collect();
        if !dead.is_empty() {
            debug!(task_id = %id, count = dead.len(), "pruning closed connections");
            if let Some(mut entry) = self.subscribers.get_mut(id) {
                entry.retain(|c| !dead.iter().any(|d| d == c.id()));
            }
        }
    }

    /// Persist and broadcast a message.
    ///
    /// Blank messages and anything arriving after the conversation was aborted
    /// are dropped entirely; `Ok(None)` reports the suppression.
    pub fn post_message(
        &self,
        conversation: &Conversation,
        message: ChatMessage,
    ) -> Result<Option<ChatMessage>> {
        if message.is_blank() || conversation.is_aborted() {
            return Ok(None);
        }
        self.persist_and_send(conversation, message).map(Some)
    }

    /// Like [`post_message`](Self::post_message) but ignores the aborted flag.
    /// Used for the interrupt notice itself.
    pub fn post_message_forced(
        &self,
        conversation: &Conversation,
        message: ChatMessage,
    ) -> Result<ChatMessage> {
        self.persist_and_send(conversation, message)
    }

    /// Persist a non-message event to the replay document, then broadcast it.
    pub fn record_event(&self, conversation: &Conversation, event: ServerEvent) -> Result<()> {
        conversation.with_memory(|memory| {
            memory.append_event(event.clone());
            memory.save()
        })?;
        self.broadcast(conversation.id(), &event);
        Ok(())
    }

    fn persist_and_send(
        &self,
        conversation: &Conversation,
        message: ChatMessage,
    ) -> Result<ChatMessage> {
        let id = conversation.id();
        let (stored, event) = conversation.with_memory(|memory| {
            let stored = memory.append_message(message);
            let event = ServerEvent::from_message(id, &stored);
            if let Some(event) = &event {
                memory.append_event(event.clone());
            }
            memory.save().map(|_| (stored, event))
        })?;
        if let Some(event) = event {
            self.broadcast(id, &event);
        }
        Ok(stored)
    }
}
