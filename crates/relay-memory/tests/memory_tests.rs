#[cfg(test)]
mod tests {
    use relay_core::{ChatMessage, ConversationId, MessageType, ServerEvent};
    use relay_memory::*;

    fn store() -> (tempfile::TempDir, MemoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("tasks")).unwrap();
        (dir, store)
    }

    // ── Original document ──────────────────────────────────────

    #[test]
    fn test_open_task_starts_empty() {
        let (_dir, store) = store();
        let id = ConversationId::new();
        let task = store.open_task(&id, None).unwrap();
        assert!(task.messages().is_empty());
        assert!(task.father_task_id().is_none());
        assert!(!store.exists(&id));
    }

    #[test]
    fn test_save_then_load_preserves_messages() {
        let (_dir, store) = store();
        let id = ConversationId::new();
        let parent = ConversationId::new();
        let mut task = store.open_task(&id, Some(&parent)).unwrap();
        task.append_message(ChatMessage::system("seed"));
        task.append_message(ChatMessage::user("list files"));
        task.set_tool_names(vec!["bash".into()]);
        task.save().unwrap();

        assert!(store.exists(&id));
        let loaded = store.load_task(&id).unwrap().unwrap();
        assert_eq!(loaded.messages().len(), 2);
        assert_eq!(loaded.messages()[1].content, "list files");
        assert_eq!(loaded.father_task_id(), Some(&parent));
        assert_eq!(loaded.tool_names(), Some(&["bash".to_string()][..]));
        assert!(loaded.original().updated_at > 0);
    }

    #[test]
    fn test_append_message_coalesces_partials() {
        let (_dir, store) = store();
        let mut task = store.open_task(&ConversationId::new(), None).unwrap();
        let first = task
            .append_message(ChatMessage::assistant(MessageType::Message, "Hel").partial(true));
        task.append_message(ChatMessage::assistant(MessageType::Message, "Hello").partial(true));
        let last = task.append_message(ChatMessage::assistant(MessageType::Message, "Hello!"));
        assert_eq!(task.messages().len(), 1);
        assert_eq!(last.update_time, first.update_time);
        assert!(!task.messages()[0].partial);
    }

    // ── Front-end document ─────────────────────────────────────

    #[test]
    fn test_frontend_document_replays_events() {
        let (_dir, store) = store();
        let id = ConversationId::new();
        let mut task = store.open_task(&id, None).unwrap();
        let stored = task.append_message(ChatMessage::user("hi"));
        task.append_event(ServerEvent::from_message(&id, &stored).unwrap());
        task.save().unwrap();

        let doc = store.frontend(&id).unwrap().unwrap();
        assert_eq!(doc.messages.len(), 1);
        assert_eq!(doc.messages[0].kind(), "message");
        assert_eq!(
            doc.messages[0].payload().unwrap().update_time,
            stored.update_time
        );
    }

    #[test]
    fn test_frontend_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.frontend(&ConversationId::new()).unwrap().is_none());
    }

    // ── Atomic save ────────────────────────────────────────────

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, store) = store();
        let id = ConversationId::new();
        let mut task = store.open_task(&id, None).unwrap();
        task.append_message(ChatMessage::user("x"));
        task.save().unwrap();
        task.save().unwrap();
        let names: Vec<String> = std::fs::read_dir(store.root().join(id.as_str()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[test]
    fn test_corrupt_original_is_an_error() {
        let (_dir, store) = store();
        let id = ConversationId::from("broken");
        std::fs::create_dir_all(store.root().join("broken")).unwrap();
        std::fs::write(store.root().join("broken").join("original.json"), "{nope").unwrap();
        assert!(store.load_task(&id).is_err());
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        let (_dir, store) = store();
        assert!(store.open_task(&ConversationId::from("../escape"), None).is_err());
        assert!(store.open_task(&ConversationId::from(""), None).is_err());
    }

    // ── Listing ────────────────────────────────────────────────

    #[test]
    fn test_list_sessions_skips_sub_tasks() {
        let (_dir, store) = store();
        let main = ConversationId::new();
        let mut task = store.open_task(&main, None).unwrap();
        task.append_message(ChatMessage::user("build the thing"));
        task.save().unwrap();

        let mut sub = store.open_task(&ConversationId::new(), Some(&main)).unwrap();
        sub.append_message(ChatMessage::user("sub prompt"));
        sub.save().unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].task_id, main);
        assert_eq!(sessions[0].title, "build the thing");
    }

    #[test]
    fn test_list_sessions_newest_first() {
        let (_dir, store) = store();
        let older = ConversationId::new();
        let mut a = store.open_task(&older, None).unwrap();
        a.append_message(ChatMessage::user("older"));
        a.save().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = ConversationId::new();
        let mut b = store.open_task(&newer, None).unwrap();
        b.append_message(ChatMessage::user("newer"));
        b.save().unwrap();

        let sessions = store.list_sessions().unwrap();
        assert_eq!(sessions[0].task_id, newer);
        assert_eq!(sessions[1].task_id, older);
    }

    #[test]
    fn test_last_of_type_finds_final_result() {
        let messages = vec![
            ChatMessage::assistant(MessageType::CompletionResult, "first"),
            ChatMessage::assistant(MessageType::Tool, "<bash/>"),
            ChatMessage::assistant(MessageType::CompletionResult, "second"),
            ChatMessage::user("thanks"),
        ];
        let found = last_of_type(&messages, MessageType::CompletionResult).unwrap();
        assert_eq!(found.content, "second");
    }
}
