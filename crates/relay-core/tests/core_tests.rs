#[cfg(test)]
mod tests {
    use relay_core::*;
    use serde_json::json;

    // ── Message log tests ──────────────────────────────────────

    #[test]
    fn test_partial_messages_coalesce_in_place() {
        let mut log = MessageLog::new();
        let first_ts = log
            .push(ChatMessage::assistant(MessageType::Message, "Hel").partial(true))
            .update_time;
        std::thread::sleep(std::time::Duration::from_millis(3));
        log.push(ChatMessage::assistant(MessageType::Message, "Hello").partial(true));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].content, "Hello");
        assert_eq!(log.messages()[0].update_time, first_ts);

        log.push(ChatMessage::assistant(MessageType::Message, "Hello world").partial(false));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].content, "Hello world");
        assert!(!log.messages()[0].partial);
        assert_eq!(log.messages()[0].update_time, first_ts);
    }

    #[test]
    fn test_final_message_is_never_overwritten() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::assistant(MessageType::Message, "one"));
        log.push(ChatMessage::assistant(MessageType::Message, "two"));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_different_type_finalizes_trailing_partial() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::assistant(MessageType::Message, "thinking about it").partial(true));
        log.push(ChatMessage::assistant(MessageType::Tool, "<bash>").partial(true));
        assert_eq!(log.len(), 2);
        assert!(!log.messages()[0].partial);
        assert_eq!(log.messages()[0].content, "thinking about it");
        assert!(log.messages()[1].partial);
    }

    #[test]
    fn test_different_role_appends_after_partial() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::new(Role::Assistant, MessageType::System, "a").partial(true));
        log.push(ChatMessage::system("b"));
        assert_eq!(log.len(), 2);
        assert!(!log.messages()[0].partial);
    }

    #[test]
    fn test_interrupt_leaves_no_partial_behind() {
        let mut log = MessageLog::new();
        log.push(ChatMessage::user("do it"));
        log.push(ChatMessage::assistant(MessageType::Message, "Working on it").partial(true));
        log.push(ChatMessage::new(Role::User, MessageType::Interrupt, "interrupted"));
        log.push(ChatMessage::user("continue"));
        assert_eq!(log.len(), 4);
        assert!(log.messages().iter().all(|m| !m.partial));
    }

    #[test]
    fn test_blank_detection() {
        assert!(ChatMessage::assistant(MessageType::Message, "  \n ").is_blank());
        assert!(
            !ChatMessage::assistant(MessageType::Tool, " ")
                .with_original(json!({"tool": "bash"}))
                .is_blank()
        );
    }

    #[test]
    fn test_chat_message_serde_uses_camel_case() {
        let msg = ChatMessage::user("list files");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "userSendMessage");
        assert_eq!(value["role"], "user");
        assert!(value.get("updateTime").is_some());
        let restored: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(restored, msg);
    }

    // ── Wire protocol tests ────────────────────────────────────

    #[test]
    fn test_server_event_envelope() {
        let event = ServerEvent::ConversationOver {
            task_id: ConversationId::from("t1"),
            reason: ConversationOverReason::CompletionResult,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "conversationOver");
        assert_eq!(value["data"]["taskId"], "t1");
        assert_eq!(value["data"]["reason"], "completionResult");
    }

    #[test]
    fn test_message_event_from_log_entry() {
        let id = ConversationId::from("t1");
        let mut msg = ChatMessage::assistant(MessageType::Tool, "<bash>").partial(true);
        msg.update_time = 42;
        let event = ServerEvent::from_message(&id, &msg).unwrap();
        assert_eq!(event.kind(), "tool");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["updateTime"], 42);
        assert_eq!(value["data"]["partial"], true);
    }

    #[test]
    fn test_system_messages_have_no_wire_event() {
        let id = ConversationId::from("t1");
        assert!(ServerEvent::from_message(&id, &ChatMessage::system("context")).is_none());
    }

    #[test]
    fn test_client_command_parse() {
        let raw = r#"{"type":"userSendMessage","data":{"taskId":"abc","content":"list files"}}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        assert_eq!(cmd.kind(), "userSendMessage");
        assert_eq!(cmd.task_id().unwrap().as_str(), "abc");

        let raw = r#"{"type":"callSubTask","data":{"taskId":"p","content":"do it"}}"#;
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            ClientCommand::CallSubTask { tools, .. } => assert!(tools.is_empty()),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_event_coalescing_slot() {
        let id = ConversationId::from("t1");
        let a = ServerEvent::from_message(
            &id,
            &ChatMessage::assistant(MessageType::Message, "a").partial(true),
        )
        .unwrap();
        let b = ServerEvent::from_message(&id, &ChatMessage::assistant(MessageType::Message, "ab"))
            .unwrap();
        let c = ServerEvent::from_message(&id, &ChatMessage::assistant(MessageType::Think, "x"))
            .unwrap();
        assert!(a.is_coalesced_by(&b));
        assert!(!a.is_coalesced_by(&c));
        assert!(!b.is_coalesced_by(&a));
    }

    // ── Tool schema tests ──────────────────────────────────────

    #[test]
    fn test_tool_spec_param_names_walk_the_tree() {
        let spec = ToolSpec::new("assignTasks", "fan out").with_params(vec![
            ParamDefinition::required("tasks").array_of(ParamDefinition::required("task").object(
                vec![
                    ParamDefinition::required("prompt"),
                    ParamDefinition::optional("tools").array_of(ParamDefinition::required("tool")),
                ],
            )),
        ]);
        assert_eq!(spec.start_label(), "<assignTasks>");
        assert_eq!(spec.param_names(), vec!["tasks", "task", "prompt", "tools", "tool"]);
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_missing_parameters_lists_every_name() {
        let err = RelayError::MissingParameters(vec!["path".into(), "content".into()]);
        assert_eq!(err.to_string(), "missing required parameters: [path, content]");
    }

    #[test]
    fn test_cancelled_is_not_an_error_class() {
        assert!(RelayError::Cancelled.is_cancelled());
        assert!(!RelayError::LlmProvider("boom".into()).is_cancelled());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RelayError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_status_settled() {
        assert!(ConversationStatus::Completed.is_settled());
        assert!(ConversationStatus::Aborted.is_settled());
        assert!(!ConversationStatus::Streaming.is_settled());
        assert!(ConversationStatus::Error.is_terminal());
    }
}
