//! Conversation Manager — folder lifecycle, message persistence, material
//! storage, and rendered output generation (spec.md §4.I).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sa_domain::error::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::message::Message;

const TITLE_MAX_CHARS: usize = 40;
const MATERIAL_ALLOWED_EXTENSIONS: &[&str] =
    &[".txt", ".md", ".py", ".html", ".json", ".csv", ".pdf"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub materials: Vec<MaterialEntry>,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Markdown,
    Pdf,
}

/// Owns the on-disk `{root}/conversations/{id}/` tree for every
/// conversation, plus an in-memory metadata index kept in sync with it.
/// Per-conversation metadata is mutated only by the owning conversation's
/// writer (spec.md §5); concurrent reads are always permitted.
pub struct ConversationManager {
    data_root: PathBuf,
    index: RwLock<HashMap<String, ConversationMetadata>>,
}

impl ConversationManager {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        let data_root = data_root.into();
        let manager = Self {
            data_root,
            index: RwLock::new(HashMap::new()),
        };
        manager.load_index();
        manager
    }

    fn load_index(&self) {
        let root = self.data_root.join("conversations");
        let Ok(entries) = std::fs::read_dir(&root) else {
            return;
        };
        let mut index = self.index.write();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let metadata_path = entry.path().join("metadata.json");
            if let Ok(bytes) = std::fs::read(&metadata_path) {
                if let Ok(meta) = serde_json::from_slice::<ConversationMetadata>(&bytes) {
                    index.insert(meta.id.clone(), meta);
                }
            }
        }
    }

    fn conversation_dir(&self, id: &str) -> PathBuf {
        self.data_root.join("conversations").join(id)
    }
    fn materials_dir(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("materials")
    }
    fn outputs_dir(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("outputs")
    }
    fn metadata_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("metadata.json")
    }
    fn messages_path(&self, id: &str) -> PathBuf {
        self.conversation_dir(id).join("messages.json")
    }

    pub fn exists(&self, id: &str) -> bool {
        self.index.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<ConversationMetadata> {
        self.index.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ConversationMetadata> {
        let mut all: Vec<_> = self.index.read().values().cloned().collect();
        all.sort_by_key(|c| c.created_at);
        all
    }

    /// Create the folder tree and metadata.json for a new conversation.
    /// Idempotent: if `id` already exists, returns the existing metadata
    /// unchanged (spec.md §3: "created on first prompt").
    pub fn create(&self, id: &str, first_prompt: &str) -> Result<ConversationMetadata> {
        if let Some(existing) = self.get(id) {
            return Ok(existing);
        }

        std::fs::create_dir_all(self.materials_dir(id))?;
        std::fs::create_dir_all(self.outputs_dir(id))?;

        let now = Utc::now();
        let metadata = ConversationMetadata {
            id: id.to_owned(),
            title: derive_title(first_prompt),
            created_at: now,
            updated_at: now,
            materials: Vec::new(),
            message_count: 0,
        };
        self.write_metadata(&metadata)?;
        self.index.write().insert(id.to_owned(), metadata.clone());
        Ok(metadata)
    }

    fn write_metadata(&self, metadata: &ConversationMetadata) -> Result<()> {
        atomic_write_json(&self.metadata_path(&metadata.id), metadata)
    }

    /// Atomic write of the full message list, advancing `message_count`
    /// and `updated_at` on the conversation's metadata.
    pub fn save_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        atomic_write_json(&self.messages_path(id), &messages)?;

        let snapshot = {
            let mut index = self.index.write();
            let meta = index.get_mut(id).expect("existence checked above");
            meta.message_count = messages.len();
            meta.updated_at = Utc::now();
            meta.clone()
        };
        self.write_metadata(&snapshot)
    }

    pub fn load_messages(&self, id: &str) -> Result<Vec<Message>> {
        let path = self.messages_path(id);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one message, loading and rewriting the full list. Transcripts
    /// are small (per-conversation, not global), so a read-modify-write is
    /// simpler than an append-only log and still meets the atomic-write
    /// requirement on every persisted revision.
    pub fn append_message(&self, id: &str, message: Message) -> Result<()> {
        let mut messages = self.load_messages(id)?;
        messages.push(message);
        self.save_messages(id, &messages)
    }

    /// Save a user-provided material. `name` is sanitized to a single
    /// filename component — path separators and `..` are rejected — and
    /// given a recognized extension if it lacks one (spec.md §4.I).
    pub fn save_material(&self, id: &str, name: &str, content: &[u8]) -> Result<PathBuf> {
        if !self.exists(id) {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        let safe_name = sanitize_material_name(name)?;
        let materials_dir = self.materials_dir(id);
        std::fs::create_dir_all(&materials_dir)?;
        let path = materials_dir.join(&safe_name);
        std::fs::write(&path, content)?;

        self.record_material(
            id,
            MaterialEntry {
                name: safe_name,
                path: path.clone(),
                source_url: None,
                added_at: Utc::now(),
            },
        )?;
        Ok(path)
    }

    /// Copy a downloaded file into `materials/`, recording its source URL
    /// in the conversation's metadata.
    pub fn ingest_downloaded_file(
        &self,
        id: &str,
        source_url: &str,
        local_path: &Path,
    ) -> Result<PathBuf> {
        if !self.exists(id) {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation("local_path has no file name".into()))?;
        let safe_name = sanitize_material_name(name)?;
        let materials_dir = self.materials_dir(id);
        std::fs::create_dir_all(&materials_dir)?;
        let dest = materials_dir.join(&safe_name);
        std::fs::copy(local_path, &dest)?;

        self.record_material(
            id,
            MaterialEntry {
                name: safe_name,
                path: dest.clone(),
                source_url: Some(source_url.to_owned()),
                added_at: Utc::now(),
            },
        )?;
        Ok(dest)
    }

    fn record_material(&self, id: &str, entry: MaterialEntry) -> Result<()> {
        let snapshot = {
            let mut index = self.index.write();
            let meta = index.get_mut(id).expect("existence checked by caller");
            meta.materials.push(entry);
            meta.updated_at = Utc::now();
            meta.clone()
        };
        self.write_metadata(&snapshot)
    }

    /// Render `# {title}` / `## Conversation` / `## Materials` markdown.
    /// For `format = Pdf`, attempts an external renderer; on failure (or
    /// when none is configured — PDF rendering is out of scope per
    /// spec.md §1) falls back to returning the markdown path with a
    /// warning rather than failing the call.
    pub fn generate_output(
        &self,
        id: &str,
        format: OutputFormat,
    ) -> Result<(PathBuf, Option<String>)> {
        let metadata = self
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))?;
        let messages = self.load_messages(id)?;

        let markdown = render_markdown(&metadata, &messages);
        let outputs_dir = self.outputs_dir(id);
        std::fs::create_dir_all(&outputs_dir)?;
        let markdown_path = outputs_dir.join("output.md");
        std::fs::write(&markdown_path, &markdown)?;

        match format {
            OutputFormat::Markdown => Ok((markdown_path, None)),
            OutputFormat::Pdf => match render_pdf(&markdown, &outputs_dir.join("output.pdf")) {
                Ok(pdf_path) => Ok((pdf_path, None)),
                Err(e) => Ok((
                    markdown_path,
                    Some(format!(
                        "pdf rendering unavailable, returning markdown instead: {e}"
                    )),
                )),
            },
        }
    }
}

fn derive_title(first_prompt: &str) -> String {
    let trimmed = first_prompt.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_owned();
    }

    let truncated: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    if let Some(idx) = truncated.rfind(['.', '!', '?']) {
        if idx > 0 {
            return format!(
                "{}...",
                truncated[..=idx].trim_end_matches(['.', '!', '?']).trim()
            );
        }
    }
    if let Some(idx) = truncated.rfind(' ') {
        if idx > 0 {
            return format!("{}...", &truncated[..idx]);
        }
    }
    format!("{truncated}...")
}

fn sanitize_material_name(name: &str) -> Result<String> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(Error::Validation(format!("invalid material name: {name}")));
    }
    if MATERIAL_ALLOWED_EXTENSIONS
        .iter()
        .any(|ext| name.ends_with(ext))
    {
        Ok(name.to_owned())
    } else {
        Ok(format!("{name}.txt"))
    }
}

fn render_markdown(metadata: &ConversationMetadata, messages: &[Message]) -> String {
    let mut out = format!("# {}\n\n## Conversation\n\n", metadata.title);
    for message in messages {
        let role = match message.role {
            crate::message::Role::User => "user",
            crate::message::Role::Assistant => "assistant",
            crate::message::Role::System => "system",
        };
        out.push_str(&format!("**{role}**: {}\n\n", message.content));
    }
    out.push_str("## Materials\n\n");
    for material in &metadata.materials {
        out.push_str(&format!(
            "### {}\n\n```\n{}\n```\n\n",
            material.name,
            material.path.display()
        ));
    }
    out
}

/// External renderer boundary (PDF rendering is out of scope per spec.md
/// §1). Fails unconditionally so callers exercise the documented
/// fall-back-to-markdown path; a real deployment wires this to a renderer
/// binary or service.
fn render_pdf(_markdown: &str, _dest: &Path) -> std::result::Result<PathBuf, String> {
    Err("no PDF renderer configured".to_owned())
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let parent = path
        .parent()
        .ok_or_else(|| Error::Internal("path has no parent".into()))?;
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
