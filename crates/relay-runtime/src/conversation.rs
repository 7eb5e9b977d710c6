use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relay_core::{
    ChatMessage, ConversationId, ConversationKind, ConversationStatus, RelayError, Result,
};
use relay_memory::TaskMemory;

/// One linear dialogue: its identity, execution status, pending input and
/// persisted documents.
///
/// Status and pending input live in `watch` channels so the loop and parents
/// can wait for changes without polling.
pub struct Conversation {
    id: ConversationId,
    kind: ConversationKind,
    parent_id: Option<ConversationId>,
    root_id: ConversationId,
    tool_names: Vec<String>,
    status: watch::Sender<ConversationStatus>,
    pending_input: watch::Sender<String>,
    aborted: AtomicBool,
    loop_running: AtomicBool,
    memory: Mutex<TaskMemory>,
    /// Handle of the in-flight stream, if any.
    stream: Mutex<Option<CancellationToken>>,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        parent_id: Option<ConversationId>,
        root_id: ConversationId,
        tool_names: Vec<String>,
        memory: TaskMemory,
    ) -> Self {
        let kind = if parent_id.is_some() {
            ConversationKind::Sub
        } else {
            ConversationKind::Main
        };
        Self {
            id,
            kind,
            parent_id,
            root_id,
            tool_names,
            status: watch::Sender::new(ConversationStatus::Idle),
            pending_input: watch::Sender::new(String::new()),
            aborted: AtomicBool::new(false),
            loop_running: AtomicBool::new(false),
            memory: Mutex::new(memory),
            stream: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn kind(&self) -> ConversationKind {
        self.kind
    }

    pub fn is_sub(&self) -> bool {
        self.kind == ConversationKind::Sub
    }

    pub fn parent_id(&self) -> Option<&ConversationId> {
        self.parent_id.as_ref()
    }

    /// Top of the task tree; keys the shared sandbox.
    pub fn root_id(&self) -> &ConversationId {
        &self.root_id
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    // ── Status ─────────────────────────────────────────────────

    pub fn status(&self) -> ConversationStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConversationStatus> {
        self.status.subscribe()
    }

    /// Unconditional transition, used by interrupt, resume and input submission.
    pub fn set_status(&self, status: ConversationStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(task_id = %self.id, from = ?previous, to = ?status, "status changed");
        }
    }

    /// Transition requested by the loop. Refused once the conversation is aborted,
    /// so a turn that races an interrupt cannot overwrite `aborted`.
    pub fn advance(&self, status: ConversationStatus) -> bool {
        if self.is_aborted() {
            return false;
        }
        self.set_status(status);
        true
    }

    /// Wait until the status satisfies `done`.
    pub async fn wait_for_status(
        &self,
        done: impl FnMut(&ConversationStatus) -> bool,
    ) -> ConversationStatus {
        let mut rx = self.status.subscribe();
        // the sender lives as long as `self`, so the channel cannot close here
        match rx.wait_for(done).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        }
    }

    // ── Pending input ──────────────────────────────────────────

    pub fn pending_input(&self) -> String {
        self.pending_input.borrow().clone()
    }

    pub fn has_pending_input(&self) -> bool {
        !self.pending_input.borrow().is_empty()
    }

    pub fn set_pending_input(&self, input: impl Into<String>) {
        self.pending_input.send_replace(input.into());
    }

    pub fn clear_pending_input(&self) {
        self.pending_input.send_replace(String::new());
    }

    /// Suspend until there is pending input, then return it (without clearing).
    pub async fn wait_for_input(&self) -> Result<String> {
        let mut rx = self.pending_input.subscribe();
        let input = rx
            .wait_for(|s| !s.is_empty())
            .await
            .map_err(|_| RelayError::ConversationNotFound(self.id.to_string()))?;
        Ok(input.clone())
    }

    // ── Abort flag & stream handle ─────────────────────────────

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn set_aborted(&self, aborted: bool) {
        self.aborted.store(aborted, Ordering::SeqCst);
    }

    /// Raise the abort flag. Only the caller that actually raised it gets `true`.
    pub fn try_abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::SeqCst)
    }

    /// Install a fresh cancellation handle for a new stream. `None` when the
    /// conversation was aborted in the meantime.
    pub fn begin_stream(&self) -> Option<CancellationToken> {
        let mut slot = self.stream.lock();
        if self.is_aborted() {
            return None;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Some(token)
    }

    /// Abort the in-flight stream, if any. Idempotent.
    pub fn cancel_stream(&self) {
        if let Some(token) = self.stream.lock().take() {
            token.cancel();
        }
    }

    /// Drop the handle once the stream has finished on its own.
    pub fn end_stream(&self) {
        self.stream.lock().take();
    }

    pub fn has_active_stream(&self) -> bool {
        self.stream.lock().is_some()
    }

    // ── Loop ownership ─────────────────────────────────────────

    /// Claim the right to run this conversation's loop. False if one is running.
    pub(crate) fn try_start_loop(&self) -> bool {
        self.loop_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn loop_stopped(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
    }

    pub fn is_loop_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }

    // ── Messages ───────────────────────────────────────────────

    /// Run `f` with exclusive access to the persisted documents.
    pub fn with_memory<R>(&self, f: impl FnOnce(&mut TaskMemory) -> R) -> R {
        f(&mut self.memory.lock())
    }

    /// Snapshot of the model-facing log.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.memory.lock().messages().to_vec()
    }
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("parent_id", &self.parent_id)
            .field("status", &self.status())
            .finish()
    }
}

/// Explicit registry of live conversations, owned by one runtime.
#[derive(Default)]
pub struct ConversationRepository {
    conversations: DashMap<ConversationId, Arc<Conversation>>,
}

impl ConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `conversation`. An existing entry with the same id wins and is returned.
    pub fn create(&self, conversation: Conversation) -> Arc<Conversation> {
        self.conversations
            .entry(conversation.id().clone())
            .or_insert_with(|| Arc::new(conversation))
            .clone()
    }

    pub fn get(&self, id: &ConversationId) -> Option<Arc<Conversation>> {
        self.conversations.get(id).map(|c| c.clone())
    }

    pub fn remove(&self, id: &ConversationId) -> Option<Arc<Conversation>> {
        self.conversations.remove(id).map(|(_, c)| c)
    }

    /// Direct children of `id`.
    pub fn children_of(&self, id: &ConversationId) -> Vec<Arc<Conversation>> {
        self.conversations
            .iter()
            .filter(|entry| entry.parent_id() == Some(id))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Conversation>> {
        self.conversations.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
