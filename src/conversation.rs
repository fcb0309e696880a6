//! File-backed conversation logs.
//!
//! One append-only UTF-8 text file per conversation, named `<id>.txt`. Logs
//! are never truncated or deleted by jarvis.

use crate::error::JarvisError;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_EXTENSION: &str = "txt";

/// Generate a fresh conversation identifier.
pub fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The directory holding conversation logs.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Identifiers of all saved conversations, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read conversations directory: {}", self.dir.display()))?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Full text of a conversation, or `None` if it was never saved.
    pub fn load_history(&self, id: &str) -> Result<Option<String>> {
        let path = self.log_path(id)?;
        if !path.is_file() {
            return Ok(None);
        }
        let history = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read conversation: {}", path.display()))?;
        Ok(Some(history))
    }

    /// Append `text` to a conversation, creating the log on first save.
    pub fn append(&self, id: &str, text: &str) -> Result<()> {
        let path = self.log_path(id)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create conversations directory: {}", self.dir.display()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open conversation: {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("Failed to write conversation: {}", path.display()))?;
        Ok(())
    }

    /// A handle that appends to one conversation.
    pub fn log(&self, id: &str) -> Result<ConversationLog<'_>> {
        validate_id(id)?;
        Ok(ConversationLog {
            store: self,
            id: id.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, LOG_EXTENSION)))
    }
}

/// Identifiers become file names, so they must stay inside the directory.
fn validate_id(id: &str) -> Result<(), JarvisError> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\'])
        || id.contains('\0');
    if invalid {
        Err(JarvisError::InvalidConversationId(id.to_string()))
    } else {
        Ok(())
    }
}

/// Destination for persisted response text.
pub trait TranscriptSink {
    fn append(&mut self, text: &str) -> Result<()>;
}

/// One conversation's log file.
pub struct ConversationLog<'a> {
    store: &'a ConversationStore,
    id: String,
}

impl ConversationLog<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl TranscriptSink for ConversationLog<'_> {
    fn append(&mut self, text: &str) -> Result<()> {
        self.store.append(&self.id, text)
    }
}
