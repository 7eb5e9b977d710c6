//! One WebSocket client: greet, route commands into the runtime, forward broadcasts.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use relay_core::{ClientCommand, ConversationId, Result, ServerEvent};
use relay_runtime::{ChannelConnection, Connection, Runtime};

/// Events sent to a freshly connected client.
pub fn greeting(runtime: &Runtime, connection_id: &str) -> Vec<ServerEvent> {
    let mut events = vec![ServerEvent::Connected {
        connection_id: connection_id.to_string(),
    }];
    match runtime.session_histories() {
        Ok(sessions) => events.push(ServerEvent::SessionHistories { sessions }),
        Err(e) => events.push(ServerEvent::Error {
            task_id: None,
            message: format!("failed to list sessions: {e}"),
        }),
    }
    events
}

/// Parse and execute one client frame. Returns the direct replies: an `ack`
/// (plus `taskHistory` for loads) on success, an `error` otherwise. Everything
/// else reaches the client through its broadcast subscription.
pub async fn handle_command(
    runtime: &Runtime,
    connection: &Arc<dyn Connection>,
    frame: &str,
) -> Vec<ServerEvent> {
    let command: ClientCommand = match serde_json::from_str(frame) {
        Ok(command) => command,
        Err(e) => {
            return vec![ServerEvent::Error {
                task_id: None,
                message: format!("invalid command: {e}"),
            }];
        }
    };
    let kind = command.kind();
    let task_id = command.task_id().cloned();
    debug!(connection = connection.id(), command = kind, task_id = ?task_id, "client command");

    match execute(runtime, connection, command).await {
        Ok(reply) => {
            let mut events = vec![ServerEvent::Ack {
                task_id: reply.task_id.or(task_id),
                command: kind.to_string(),
            }];
            events.extend(reply.events);
            events
        }
        Err(e) => {
            warn!(connection = connection.id(), command = kind, error = %e, "command failed");
            vec![ServerEvent::Error {
                task_id,
                message: e.to_string(),
            }]
        }
    }
}

/// What a command hands back beyond the `ack`.
#[derive(Default)]
struct Reply {
    /// Conversation the command created, acknowledged instead of the request's id.
    task_id: Option<ConversationId>,
    events: Vec<ServerEvent>,
}

impl Reply {
    fn created(id: ConversationId) -> Self {
        Self {
            task_id: Some(id),
            events: vec![],
        }
    }
}

async fn execute(
    runtime: &Runtime,
    connection: &Arc<dyn Connection>,
    command: ClientCommand,
) -> Result<Reply> {
    match command {
        ClientCommand::CreateTask { content } => {
            let conversation = runtime.open_task()?;
            let id = conversation.id().clone();
            runtime.subscribe(&id, connection.clone())?;
            runtime.user_send_message(&id, &content)?;
            info!(task_id = %id, "task created");
            Ok(Reply::created(id))
        }
        ClientCommand::UserSendMessage { task_id, content } => {
            runtime.subscribe(&task_id, connection.clone())?;
            runtime.user_send_message(&task_id, &content)?;
            Ok(Reply::default())
        }
        ClientCommand::Interrupt { task_id } => {
            runtime.interrupt(&task_id).await?;
            Ok(Reply::default())
        }
        ClientCommand::Resume { task_id } => {
            runtime.subscribe(&task_id, connection.clone())?;
            runtime.resume(&task_id)?;
            Ok(Reply::default())
        }
        ClientCommand::LoadTask { task_id } | ClientCommand::LoadSubTask { task_id } => {
            runtime.subscribe(&task_id, connection.clone())?;
            Ok(Reply {
                task_id: None,
                events: vec![runtime.history(&task_id)?],
            })
        }
        ClientCommand::CallSubTask {
            task_id,
            content,
            tools,
        } => Ok(Reply::created(runtime.call_sub_task(&task_id, &content, &tools)?)),
    }
}

/// Send `event` to a single connection.
pub fn deliver(connection: &dyn Connection, event: &ServerEvent) {
    match event.to_json() {
        Ok(frame) => {
            connection.send(&frame);
        }
        Err(e) => warn!(connection = connection.id(), error = %e, "failed to serialize event"),
    }
}

/// Drive one socket until the client goes away.
pub(crate) async fn serve_socket(socket: WebSocket, runtime: Runtime) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (conn, mut outbox) = ChannelConnection::new(connection_id.clone());
    let connection: Arc<dyn Connection> = Arc::new(conn);
    info!(connection = %connection_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    for event in greeting(&runtime, &connection_id) {
        deliver(connection.as_ref(), &event);
    }

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                for reply in handle_command(&runtime, &connection, text.as_str()).await {
                    deliver(connection.as_ref(), &reply);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = %connection_id, error = %e, "socket error");
                break;
            }
        }
    }

    runtime.broadcaster().disconnect(&connection_id);
    writer.abort();
    info!(connection = %connection_id, "client disconnected");
}
