use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use tracing::{info, warn};

use relay_core::{ParamDefinition, RelayError, Result, ToolSpec};

use crate::registry::{Tool, ToolContext, ToolOutput};
use crate::tasks::filter_tools;

/// Fans work out to child conversations in bounded batches.
pub struct AssignTasksTool;

struct Assignment {
    index: usize,
    prompt: String,
    tools: Vec<String>,
}

fn parse_assignments(params: &Value, available: &[String]) -> (Vec<Assignment>, Vec<String>) {
    let mut warnings = Vec::new();
    let tasks = params["tasks"].as_array().cloned().unwrap_or_default();
    let assignments = tasks
        .iter()
        .enumerate()
        .map(|(index, task)| {
            let requested: Vec<String> = task["tools"]
                .as_array()
                .map(|names| {
                    names
                        .iter()
                        .filter_map(|n| n.as_str())
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let (tools, dropped) = filter_tools(available, &requested);
            for name in dropped {
                warnings.push(format!("task {index}: unknown tool '{name}' dropped"));
            }
            Assignment {
                index,
                prompt: task["prompt"].as_str().unwrap_or_default().to_string(),
                tools,
            }
        })
        .collect();
    (assignments, warnings)
}

#[async_trait]
impl Tool for AssignTasksTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "assignTasks",
            "Split work into independent sub-tasks, each handled by its own agent. \
             Returns every sub-task's result once all have finished.",
        )
        .with_usage(
            "<assignTasks><tasks>\n\
             <task><prompt>Count the lines in src/</prompt><tools><tool>bash</tool></tools></task>\n\
             <task><prompt>Summarise README.md</prompt></task>\n\
             </tasks></assignTasks>",
        )
        .with_params(vec![
            ParamDefinition::required("tasks").array_of(ParamDefinition::required("task").object(
                vec![
                    ParamDefinition::required("prompt")
                        .describe("Self-contained instructions for the sub-task"),
                    ParamDefinition::optional("tools")
                        .array_of(ParamDefinition::required("tool"))
                        .describe("Tools the sub-task may use; defaults to yours"),
                ],
            )),
        ])
    }

    async fn invoke(&self, params: Value, ctx: ToolContext) -> Result<ToolOutput> {
        let (assignments, warnings) = parse_assignments(&params, ctx.available_tools());
        for warning in &warnings {
            warn!(task_id = %ctx.conversation_id(), "{warning}");
        }
        if assignments.is_empty() {
            return Err(RelayError::ToolExecution {
                tool: "assignTasks".into(),
                reason: "no tasks given".into(),
            });
        }

        let batch_size = ctx.config().runtime.subtask_batch_size.max(1);
        info!(
            task_id = %ctx.conversation_id(),
            tasks = assignments.len(),
            batch_size,
            "assigning sub-tasks"
        );

        let mut results = Vec::with_capacity(assignments.len());
        for batch in assignments.chunks(batch_size) {
            let outcomes = join_all(batch.iter().map(|a| {
                ctx.run_sub_task(a.prompt.clone(), a.tools.clone(), a.index)
            }))
            .await;

            for (assignment, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(result) => results.push(json!({
                        "index": assignment.index,
                        "prompt": assignment.prompt,
                        "result": result,
                    })),
                    Err(RelayError::Cancelled) => return Err(RelayError::Cancelled),
                    Err(e) => results.push(json!({
                        "index": assignment.index,
                        "prompt": assignment.prompt,
                        "error": e.to_string(),
                    })),
                }
            }
            if ctx.cancel_token().is_cancelled() {
                return Err(RelayError::Cancelled);
            }
        }

        let mut summary = String::new();
        for r in &results {
            let body = r["result"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("FAILED: {}", r["error"].as_str().unwrap_or_default()));
            summary.push_str(&format!(
                "## Task {}: {}\n{body}\n\n",
                r["index"],
                r["prompt"].as_str().unwrap_or_default()
            ));
        }
        for warning in &warnings {
            summary.push_str(&format!("warning: {warning}\n"));
        }

        Ok(ToolOutput::new(summary.trim_end()).with_data(json!({
            "results": results,
            "warnings": warnings,
        })))
    }
}
