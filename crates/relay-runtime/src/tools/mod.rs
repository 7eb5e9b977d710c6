//! Built-in tools.

mod assign_tasks;
mod bash;

pub use assign_tasks::AssignTasksTool;
pub use bash::BashTool;

use std::sync::Arc;

use crate::registry::Tool;

/// Every built-in tool, in registration order.
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(BashTool), Arc::new(AssignTasksTool)]
}
