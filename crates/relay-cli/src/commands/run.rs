use std::io::IsTerminal;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use relay_config::RelayConfig;
use relay_core::{ConversationOverReason, Role, ServerEvent};
use relay_runtime::{ChannelConnection, Runtime};

/// Run one task in-process, printing events until the model finishes. When the
/// model asks a question and stdin is a terminal, the answer is read from stdin.
pub(super) async fn cmd_run(
    config: RelayConfig,
    prompt: String,
    json: bool,
) -> relay_core::Result<()> {
    let provider = super::build_provider(&config)?;
    let runtime = Runtime::from_config(config, provider)?;

    let conversation = runtime.open_task()?;
    let id = conversation.id().clone();
    let (conn, mut frames) = ChannelConnection::new("cli");
    runtime.subscribe(&id, Arc::new(conn))?;
    runtime.user_send_message(&id, &prompt)?;

    let interactive = std::io::stdin().is_terminal();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let frame = tokio::select! {
            frame = frames.recv() => frame,
            _ = tokio::signal::ctrl_c() => {
                runtime.interrupt(&id).await?;
                continue;
            }
        };
        let Some(frame) = frame else { break };
        if json {
            println!("{frame}");
        }

        let event: ServerEvent = match serde_json::from_str(&frame) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unreadable event frame");
                continue;
            }
        };
        if !json && let Some(line) = render(&event) {
            println!("{line}");
        }

        if let ServerEvent::ConversationOver { reason, .. } = event {
            let wants_answer = matches!(
                reason,
                ConversationOverReason::AskFollowupQuestion | ConversationOverReason::NoToolCall
            );
            if !(wants_answer && interactive) {
                break;
            }
            print!("> ");
            let _ = std::io::Write::flush(&mut std::io::stdout());
            match stdin.next_line().await? {
                Some(answer) if !answer.trim().is_empty() => {
                    runtime.user_send_message(&id, &answer)?;
                }
                _ => break,
            }
        }
    }

    debug!(task_id = %id, "headless run finished");
    runtime.shutdown().await;
    if !json {
        eprintln!("task: {id}");
    }
    Ok(())
}

/// Terminal rendering of one event. Partial updates and echoes of the user's
/// own input are skipped.
fn render(event: &ServerEvent) -> Option<String> {
    if event.payload().is_some_and(|p| p.partial) {
        return None;
    }
    match event {
        ServerEvent::Message(p) if p.role == Role::User => None,
        ServerEvent::Message(p) => Some(p.content.clone()),
        ServerEvent::Think(p) => Some(format!("(thinking) {}", p.content.trim())),
        ServerEvent::Tool(p) => {
            let data = p.data.as_ref()?;
            let tool = data["tool"].as_str().unwrap_or("tool");
            match data["error"].as_str() {
                Some(error) => Some(format!("[{tool}] failed: {error}")),
                None => Some(format!(
                    "[{tool}] {}",
                    super::truncate_output(data["summary"].as_str().unwrap_or_default(), 200)
                )),
            }
        }
        ServerEvent::CompletionResult(p) => Some(format!("\n{}", p.content)),
        ServerEvent::AskFollowupQuestion(p) => Some(format!("? {}", p.content)),
        ServerEvent::Interrupt(_) => Some("interrupted".into()),
        ServerEvent::AssignTaskUpdated {
            index,
            status,
            prompt,
            ..
        } => Some(format!(
            "  sub-task {index} {status:?}: {}",
            super::truncate_output(prompt, 60)
        )),
        ServerEvent::Alert { message, .. } => Some(format!("alert: {message}")),
        ServerEvent::Error { message, .. } => Some(format!("error: {message}")),
        _ => None,
    }
}
