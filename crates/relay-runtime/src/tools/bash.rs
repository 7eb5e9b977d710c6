use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use relay_core::{ParamDefinition, RelayError, Result, ToolSpec};

use crate::registry::{Tool, ToolContext, ToolOutput};

/// Runs one shell command in the task tree's shared sandbox.
pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "bash",
            "Run a shell command in the task workspace and return its combined output.",
        )
        .with_usage("<bash><command>ls -la</command></bash>")
        .with_params(vec![
            ParamDefinition::required("command").describe("The command line to run with sh -c"),
        ])
    }

    async fn invoke(&self, params: Value, ctx: ToolContext) -> Result<ToolOutput> {
        let command = params["command"]
            .as_str()
            .ok_or_else(|| RelayError::ToolExecution {
                tool: "bash".into(),
                reason: "missing 'command' argument".into(),
            })?
            .to_string();

        info!(task_id = %ctx.conversation_id(), command = %command, "executing shell command");
        let sandbox = ctx.sandbox().await?;
        let output = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(RelayError::Cancelled),
            out = sandbox.run_command(&command) => out.map_err(|e| RelayError::ToolExecution {
                tool: "bash".into(),
                reason: e.to_string(),
            })?,
        };

        let summary = if output.trim().is_empty() {
            "(no output)".to_string()
        } else {
            output.clone()
        };
        Ok(ToolOutput::new(summary).with_data(json!({
            "command": command,
            "output": output,
        })))
    }
}
