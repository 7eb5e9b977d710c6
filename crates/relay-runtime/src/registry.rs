//! Tool trait, execution context, and the name → handler registry.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use relay_config::RelayConfig;
use relay_core::{
    ChatMessage, ConversationId, ParamDefinition, RelayError, Result, Sandbox, ToolSpec,
};

use crate::conversation::Conversation;
use crate::runtime::Runtime;

/// Ends the conversation turn with a final answer.
pub const COMPLETION_RESULT: &str = "completionResult";
/// Ends the turn with a question for the user.
pub const ASK_FOLLOWUP_QUESTION: &str = "askFollowupQuestion";
/// Visible reasoning; does not end the turn.
pub const THINK: &str = "think";

pub const RESERVED_TAGS: [&str; 3] = [COMPLETION_RESULT, ASK_FOLLOWUP_QUESTION, THINK];

/// Schemas of the reserved control tags.
pub fn reserved_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec::new(COMPLETION_RESULT, "Finish the task and report the outcome.")
            .with_usage("<completionResult><result>What was done.</result></completionResult>")
            .with_params(vec![ParamDefinition::optional("result")]),
        ToolSpec::new(ASK_FOLLOWUP_QUESTION, "Stop and ask the user for missing information.")
            .with_usage(
                "<askFollowupQuestion><question>Which branch?</question></askFollowupQuestion>",
            )
            .with_params(vec![ParamDefinition::optional("question")]),
        ToolSpec::new(THINK, "Think out loud before acting. Does not end the turn.")
            .with_usage("<think>First I will list the files.</think>"),
    ]
}

/// What a tool hands back: a summary for the model and structured data for clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub summary: String,
    pub data: Value,
}

impl ToolOutput {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A callable tool. Bodies must honour [`ToolContext::cancel_token`].
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, params: Value, ctx: ToolContext) -> Result<ToolOutput>;
}

/// Everything a tool may touch while it runs.
#[derive(Clone)]
pub struct ToolContext {
    runtime: Runtime,
    conversation: Arc<Conversation>,
    cancel: CancellationToken,
}

impl ToolContext {
    pub(crate) fn new(
        runtime: Runtime,
        conversation: Arc<Conversation>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            conversation,
            cancel,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        self.conversation.id()
    }

    pub fn parent_id(&self) -> Option<&ConversationId> {
        self.conversation.parent_id()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn config(&self) -> &RelayConfig {
        self.runtime.config()
    }

    /// Tools the calling conversation is bound to.
    pub fn available_tools(&self) -> &[String] {
        self.conversation.tool_names()
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.runtime.registry().get(name)
    }

    /// The sandbox shared by this conversation's whole task tree, created on first use.
    pub async fn sandbox(&self) -> Result<Arc<dyn Sandbox>> {
        self.runtime
            .sandboxes()
            .acquire(self.conversation.root_id(), self.conversation.id())
            .await
    }

    /// Post a progress message into the calling conversation.
    pub fn push_message(&self, message: ChatMessage) -> Result<()> {
        self.runtime
            .broadcaster()
            .post_message(&self.conversation, message)?;
        Ok(())
    }

    /// Run a child conversation to completion and return its result text.
    pub async fn run_sub_task(
        &self,
        prompt: String,
        tools: Vec<String>,
        index: usize,
    ) -> Result<String> {
        self.runtime
            .run_sub_task(&self.conversation, prompt, tools, index, &self.cancel)
            .await
    }
}

/// Name → handler map with stable registration order.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `bash` and `assignTasks`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in crate::tools::builtin_tools() {
            // builtin names never collide with reserved tags
            let _ = registry.register(tool);
        }
        registry
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.spec().name;
        if RESERVED_TAGS.contains(&name.as_str()) {
            return Err(RelayError::Config(format!(
                "'{name}' is a reserved tag and cannot be registered as a tool"
            )));
        }
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec())
            .collect()
    }

    /// Specs for `names`, skipping unknown ones.
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| t.spec())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(&self, name: &str, params: Value, ctx: ToolContext) -> Result<ToolOutput> {
        let tool = self
            .get(name)
            .ok_or_else(|| RelayError::ToolNotFound(name.to_string()))?;
        tool.invoke(params, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("echo", "echo back")
        }

        async fn invoke(&self, params: Value, _ctx: ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::new("echoed").with_data(params))
        }
    }

    struct Impostor;

    #[async_trait]
    impl Tool for Impostor {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new(COMPLETION_RESULT, "not allowed")
        }

        async fn invoke(&self, _params: Value, _ctx: ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::new(""))
        }
    }

    #[test]
    fn test_register_keeps_order_and_replaces() {
        let mut registry = ToolRegistry::with_builtins();
        registry.register(Arc::new(Echo)).unwrap();
        registry.register(Arc::new(Echo)).unwrap();
        assert_eq!(registry.names(), vec!["bash", "assignTasks", "echo"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_reserved_names_rejected() {
        let mut registry = ToolRegistry::new();
        assert!(registry.register(Arc::new(Impostor)).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_specs_for_skips_unknown() {
        let registry = ToolRegistry::with_builtins();
        let specs = registry.specs_for(&["bash".into(), "nope".into()]);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "bash");
    }

    #[test]
    fn test_reserved_specs_cover_all_reserved_tags() {
        let names: Vec<String> = reserved_specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, RESERVED_TAGS.map(String::from).to_vec());
    }
}
