//! The runtime facade: one explicit handle owning every piece of shared state.

use std::sync::Arc;
use tracing::{info, warn};

use relay_config::RelayConfig;
use relay_core::{
    ChatMessage, ConversationId, ConversationStatus, RelayError, Result, SandboxFactory,
    ServerEvent, SessionSummary, ToolSpec,
};
use relay_llm::LlmProvider;
use relay_memory::MemoryStore;

use crate::broadcaster::{Broadcaster, Connection};
use crate::conversation::{Conversation, ConversationRepository};
use crate::prompt::build_system_prompt;
use crate::registry::{ToolRegistry, reserved_specs};
use crate::sandbox::{LocalSandboxFactory, SandboxPool};
use crate::xml_params::ParamParser;

/// Injected as user input by [`Runtime::resume`].
pub const RESUME_PROMPT: &str = "Please continue the interrupted task.";

/// Longest parent chain followed when recovering a conversation's root.
const MAX_TREE_DEPTH: usize = 64;

struct RuntimeInner {
    config: RelayConfig,
    provider: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    reserved: Vec<ToolSpec>,
    params: ParamParser,
    repository: ConversationRepository,
    broadcaster: Broadcaster,
    memory: MemoryStore,
    sandboxes: SandboxPool,
}

/// Cheaply clonable handle to a runtime. Independent runtimes can coexist in
/// one process.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(
        config: RelayConfig,
        provider: Arc<dyn LlmProvider>,
        registry: ToolRegistry,
        sandbox_factory: Arc<dyn SandboxFactory>,
    ) -> Result<Self> {
        let memory = MemoryStore::open(&config.memory.root)?;
        let reserved = reserved_specs();
        let specs = registry.specs();
        let params = ParamParser::new(specs.iter().chain(reserved.iter()))?;
        info!(
            provider = provider.name(),
            tools = registry.len(),
            memory = ?config.memory.root,
            "runtime initialised"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                provider,
                registry,
                reserved,
                params,
                repository: ConversationRepository::new(),
                broadcaster: Broadcaster::new(),
                memory,
                sandboxes: SandboxPool::new(sandbox_factory),
            }),
        })
    }

    /// Runtime with the built-in tools and local sandboxes.
    pub fn from_config(config: RelayConfig, provider: Arc<dyn LlmProvider>) -> Result<Self> {
        let factory = Arc::new(LocalSandboxFactory::new(config.sandbox.clone()));
        Self::new(config, provider, ToolRegistry::with_builtins(), factory)
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.inner.provider
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn reserved(&self) -> &[ToolSpec] {
        &self.inner.reserved
    }

    pub fn params(&self) -> &ParamParser {
        &self.inner.params
    }

    pub fn repository(&self) -> &ConversationRepository {
        &self.inner.repository
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.inner.broadcaster
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.inner.memory
    }

    pub fn sandboxes(&self) -> &SandboxPool {
        &self.inner.sandboxes
    }

    // ── Conversation lifecycle ─────────────────────────────────

    /// Create a fresh conversation with a seeded system message.
    pub(crate) fn create_conversation(
        &self,
        parent: Option<&Arc<Conversation>>,
        tool_names: Vec<String>,
    ) -> Result<Arc<Conversation>> {
        let id = ConversationId::new();
        let (parent_id, root_id) = match parent {
            Some(p) => (Some(p.id().clone()), p.root_id().clone()),
            None => (None, id.clone()),
        };

        let mut memory = self.memory().open_task(&id, parent_id.as_ref())?;
        if parent_id.is_some() {
            memory.set_tool_names(tool_names.clone());
        }

        let specs = self.registry().specs_for(&tool_names);
        let system = build_system_prompt(
            self.config().agent.system_prompt.as_deref(),
            &specs,
            self.reserved(),
        );

        let conversation = self.repository().create(Conversation::new(
            id,
            parent_id,
            root_id,
            tool_names,
            memory,
        ));
        self.broadcaster()
            .post_message(&conversation, ChatMessage::system(system))?;
        info!(
            task_id = %conversation.id(),
            kind = ?conversation.kind(),
            parent = ?conversation.parent_id(),
            "conversation created"
        );
        Ok(conversation)
    }

    /// A new top-level conversation bound to every registered tool, with no input yet.
    pub fn open_task(&self) -> Result<Arc<Conversation>> {
        self.create_conversation(None, self.registry().names())
    }

    /// Create a top-level conversation and start it on `prompt`.
    pub fn create_task(&self, prompt: &str) -> Result<ConversationId> {
        let conversation = self.open_task()?;
        self.submit_input(&conversation, prompt)?;
        self.ensure_loop(&conversation);
        Ok(conversation.id().clone())
    }

    /// Deliver user input to a conversation, recovering it from disk if needed.
    pub fn user_send_message(&self, id: &ConversationId, content: &str) -> Result<()> {
        let conversation = self.load_task(id)?;
        self.submit_input(&conversation, content)?;
        self.ensure_loop(&conversation);
        Ok(())
    }

    /// Post `content` as a user message and make it the pending input.
    pub(crate) fn submit_input(&self, conversation: &Arc<Conversation>, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(RelayError::InvalidInput("message content is empty".into()));
        }
        conversation.set_aborted(false);
        if conversation.status().is_terminal() {
            conversation.set_status(ConversationStatus::Idle);
        }
        self.broadcaster()
            .post_message(conversation, ChatMessage::user(content))?;
        conversation.set_pending_input(content);
        Ok(())
    }

    /// Spawn the conversation's loop unless one is already running.
    pub(crate) fn ensure_loop(&self, conversation: &Arc<Conversation>) {
        if conversation.try_start_loop() {
            tokio::spawn(crate::orchestrator::run_conversation(
                self.clone(),
                conversation.clone(),
            ));
        }
    }

    /// Undo an interrupt: clear the abort flag and continue with a synthetic input.
    pub fn resume(&self, id: &ConversationId) -> Result<()> {
        let conversation = self.load_task(id)?;
        conversation.set_aborted(false);
        conversation.set_status(ConversationStatus::Streaming);
        self.submit_input(&conversation, RESUME_PROMPT)?;
        self.ensure_loop(&conversation);
        info!(task_id = %id, "conversation resumed");
        Ok(())
    }

    /// The live conversation for `id`, recovered from its original document when
    /// it is not in memory. Recovered conversations are `sub` iff they have a parent.
    pub fn load_task(&self, id: &ConversationId) -> Result<Arc<Conversation>> {
        if let Some(conversation) = self.repository().get(id) {
            return Ok(conversation);
        }
        let memory = self
            .memory()
            .load_task(id)?
            .ok_or_else(|| RelayError::ConversationNotFound(id.to_string()))?;

        let parent_id = memory.father_task_id().cloned();
        let tool_names = memory
            .tool_names()
            .map(|names| names.to_vec())
            .unwrap_or_else(|| self.registry().names());
        let root_id = match &parent_id {
            Some(parent) => self.resolve_root(parent)?,
            None => id.clone(),
        };

        let conversation = self.repository().create(Conversation::new(
            id.clone(),
            parent_id,
            root_id,
            tool_names,
            memory,
        ));
        info!(task_id = %id, kind = ?conversation.kind(), "conversation recovered");
        Ok(conversation)
    }

    fn resolve_root(&self, parent: &ConversationId) -> Result<ConversationId> {
        let mut current = parent.clone();
        for _ in 0..MAX_TREE_DEPTH {
            if let Some(live) = self.repository().get(&current) {
                return Ok(live.root_id().clone());
            }
            match self.memory().load_task(&current)? {
                Some(doc) => match doc.father_task_id() {
                    Some(father) => current = father.clone(),
                    None => return Ok(current),
                },
                None => return Ok(current),
            }
        }
        warn!(task_id = %parent, "task tree deeper than expected, using parent as root");
        Ok(parent.clone())
    }

    /// Replay document of `id` as a `taskHistory` event.
    pub fn history(&self, id: &ConversationId) -> Result<ServerEvent> {
        let conversation = self.load_task(id)?;
        let messages = conversation.with_memory(|m| m.frontend().messages.clone());
        Ok(ServerEvent::TaskHistory {
            task_id: id.clone(),
            father_task_id: conversation.parent_id().cloned(),
            status: Some(conversation.status()),
            messages,
        })
    }

    pub fn session_histories(&self) -> Result<Vec<SessionSummary>> {
        self.memory().list_sessions()
    }

    /// Point `connection` at conversation `id`.
    pub fn subscribe(&self, id: &ConversationId, connection: Arc<dyn Connection>) -> Result<()> {
        self.load_task(id)?;
        self.broadcaster().subscribe(id, connection);
        Ok(())
    }

    /// Stop every stream and tear down every sandbox.
    pub async fn shutdown(&self) {
        for conversation in self.repository().all() {
            conversation.cancel_stream();
        }
        self.sandboxes().shutdown().await;
        info!("runtime shut down");
    }
}
