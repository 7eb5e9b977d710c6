use std::path::{Path, PathBuf};

use relay_core::{
    ChatMessage, ConversationId, RelayError, Result, ServerEvent, SessionSummary, now_millis,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::document::{FrontendDocument, OriginalDocument};

const ORIGINAL_FILE: &str = "original.json";
const FRONTEND_FILE: &str = "frontend.json";

/// Directory-backed store: `<root>/<task id>/{original,frontend}.json`.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    root: PathBuf,
}

impl MemoryStore {
    /// Open (creating if needed) the storage root.
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        info!(?root, "opening memory store");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, id: &ConversationId) -> Result<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty()
            || raw == "."
            || raw == ".."
            || raw.contains(['/', '\\'])
        {
            return Err(RelayError::Memory(format!("invalid task id: {raw:?}")));
        }
        Ok(self.root.join(raw))
    }

    /// Whether an original document exists for `id`.
    pub fn exists(&self, id: &ConversationId) -> bool {
        self.task_dir(id)
            .map(|dir| dir.join(ORIGINAL_FILE).exists())
            .unwrap_or(false)
    }

    /// Load the documents for `id`, or start empty ones if none exist yet.
    pub fn open_task(
        &self,
        id: &ConversationId,
        father_task_id: Option<&ConversationId>,
    ) -> Result<TaskMemory> {
        if let Some(existing) = self.load_task(id)? {
            return Ok(existing);
        }
        let dir = self.task_dir(id)?;
        std::fs::create_dir_all(&dir)?;
        debug!(task_id = %id, "creating task documents");
        Ok(TaskMemory {
            dir,
            original: OriginalDocument::new(id.clone(), father_task_id.cloned()),
            frontend: FrontendDocument::new(id.clone()),
        })
    }

    /// Load the documents for `id` if they were persisted before.
    pub fn load_task(&self, id: &ConversationId) -> Result<Option<TaskMemory>> {
        let dir = self.task_dir(id)?;
        let original_path = dir.join(ORIGINAL_FILE);
        if !original_path.exists() {
            return Ok(None);
        }
        let original: OriginalDocument = read_json(&original_path)?;
        let frontend = match read_json::<FrontendDocument>(&dir.join(FRONTEND_FILE)) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(task_id = %id, error = %e, "front-end document unreadable, starting empty");
                FrontendDocument::new(id.clone())
            }
        };
        debug!(task_id = %id, messages = original.messages.len(), "loaded task documents");
        Ok(Some(TaskMemory {
            dir,
            original,
            frontend,
        }))
    }

    /// Read only the replay document.
    pub fn frontend(&self, id: &ConversationId) -> Result<Option<FrontendDocument>> {
        let path = self.task_dir(id)?.join(FRONTEND_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Every persisted top-level conversation, most recently updated first.
    pub fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path().join(ORIGINAL_FILE);
            if !path.exists() {
                continue;
            }
            match read_json::<OriginalDocument>(&path) {
                Ok(doc) if doc.father_task_id.is_none() => sessions.push(SessionSummary {
                    title: doc.title(),
                    task_id: doc.task_id,
                    updated_at: doc.updated_at,
                }),
                Ok(_) => {}
                Err(e) => warn!(?path, error = %e, "skipping unreadable task document"),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// The two documents of one conversation, held in memory by their single writer.
#[derive(Debug)]
pub struct TaskMemory {
    dir: PathBuf,
    original: OriginalDocument,
    frontend: FrontendDocument,
}

impl TaskMemory {
    pub fn original(&self) -> &OriginalDocument {
        &self.original
    }

    pub fn frontend(&self) -> &FrontendDocument {
        &self.frontend
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.original.messages.messages()
    }

    pub fn father_task_id(&self) -> Option<&ConversationId> {
        self.original.father_task_id.as_ref()
    }

    pub fn tool_names(&self) -> Option<&[String]> {
        self.original.tool_names.as_deref()
    }

    pub fn set_tool_names(&mut self, names: Vec<String>) {
        self.original.tool_names = Some(names);
    }

    /// Append to the model-facing log with coalescing; returns the stored copy
    /// (with its final timestamp).
    pub fn append_message(&mut self, message: ChatMessage) -> ChatMessage {
        self.original.messages.push(message).clone()
    }

    /// Append to the replay log with coalescing.
    pub fn append_event(&mut self, event: ServerEvent) {
        self.frontend.push(event);
    }

    /// Write both documents, each via a temp file and rename.
    pub fn save(&mut self) -> Result<()> {
        let now = now_millis();
        self.original.updated_at = now;
        self.frontend.updated_at = now;
        write_json_atomic(&self.dir.join(ORIGINAL_FILE), &self.original)?;
        write_json_atomic(&self.dir.join(FRONTEND_FILE), &self.frontend)?;
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read(path)?;
    serde_json::from_slice(&raw)
        .map_err(|e| RelayError::Memory(format!("failed to parse {}: {e}", path.display())))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
