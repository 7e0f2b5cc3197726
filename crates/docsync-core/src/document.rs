//! Document model shared by the upload and download paths.
//!
//! A document is identified by its path relative to the watched root until the
//! remote store assigns it an id. Everything else (filename, group, mime type,
//! tags, size) is derived from the path and content.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Reasons a local file is kept out of synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{path} exceeds size limit ({size} > {limit} bytes)")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("Extension not allowed: {0}")]
    DisallowedExtension(String),

    #[error("Ignored path: {0}")]
    Ignored(String),

    #[error("Not valid UTF-8 text: {0}")]
    NotText(String),
}

/// Decides which relative paths take part in sync.
///
/// Paths use `/` separators. A path is rejected when any segment is hidden
/// (starts with `.`), empty, or a parent reference, or when its extension is
/// not in the allow-list.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    allowed_extensions: Vec<String>,
    max_file_size: u64,
}

impl WatchFilter {
    /// Extensions may be given with or without the leading dot, in any case.
    pub fn new<I, S>(allowed_extensions: I, max_file_size: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed_extensions = allowed_extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext.len() > 1)
            .collect();

        Self {
            allowed_extensions,
            max_file_size,
        }
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check the path shape and extension (no I/O).
    pub fn check_path(&self, path: &str) -> Result<(), ValidationError> {
        if !is_safe_relative_path(path) {
            return Err(ValidationError::Ignored(path.to_string()));
        }

        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(normalize_extension);

        match extension {
            Some(ext) if self.allowed_extensions.contains(&ext) => Ok(()),
            _ => Err(ValidationError::DisallowedExtension(path.to_string())),
        }
    }

    /// Enforce the byte ceiling.
    pub fn check_size(&self, path: &str, size: u64) -> Result<(), ValidationError> {
        if size > self.max_file_size {
            return Err(ValidationError::TooLarge {
                path: path.to_string(),
                size,
                limit: self.max_file_size,
            });
        }
        Ok(())
    }

    pub fn accepts(&self, path: &str) -> bool {
        self.check_path(path).is_ok()
    }
}

/// Relative, non-hidden, and unable to escape the root.
///
/// Remote paths go through this before anything is written locally.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') {
        return false;
    }
    !path
        .split('/')
        .any(|segment| segment.is_empty() || segment == ".." || segment.starts_with('.'))
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

/// A local document prepared for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path relative to the watched root (`/` separated)
    pub path: String,
    /// Last path segment
    pub filename: String,
    pub content: String,
    /// Byte length of `content`
    pub size: u64,
    pub mime_type: String,
    pub tags: Vec<String>,
    /// First path segment, when the document lives in a subfolder
    pub group: Option<String>,
    /// Stored as the record's `updated_at`
    pub modified_at: DateTime<Utc>,
    pub last_editor: String,
    pub workspace_id: String,
}

impl Document {
    /// Build a document, deriving filename, group, mime type, size and tags.
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        workspace_id: impl Into<String>,
        last_editor: impl Into<String>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let path = path.into();
        let content = content.into();
        let filename = filename_of(&path).to_string();

        Self {
            group: group_of(&path).map(str::to_string),
            mime_type: mime_type_for(&filename).to_string(),
            tags: extract_tags(&content),
            size: content.len() as u64,
            filename,
            path,
            content,
            modified_at,
            last_editor: last_editor.into(),
            workspace_id: workspace_id.into(),
        }
    }

    /// Blob key this document is written to.
    pub fn storage_key(&self) -> String {
        storage_key(&self.workspace_id, self.group.as_deref(), &self.filename)
    }
}

/// Derive the blob key `workspace/[group/]filename`.
///
/// Pure function of its inputs so retried uploads overwrite the same blob.
pub fn storage_key(workspace_id: &str, group: Option<&str>, filename: &str) -> String {
    match group {
        Some(group) if !group.is_empty() => format!("{}/{}/{}", workspace_id, group, filename),
        _ => format!("{}/{}", workspace_id, filename),
    }
}

pub fn filename_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// First segment of a nested path; `None` for files at the root.
pub fn group_of(path: &str) -> Option<&str> {
    match path.split_once('/') {
        Some((group, _)) if !group.is_empty() => Some(group),
        _ => None,
    }
}

pub fn mime_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("md") => "text/markdown",
        _ => "text/plain",
    }
}

/// Extract `#hashtag` words, lower-cased and de-duplicated in first-seen order.
pub fn extract_tags(content: &str) -> Vec<String> {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"#(\w+)").expect("tag regex is valid"));

    let mut tags: Vec<String> = Vec::new();
    for capture in re.captures_iter(content) {
        let tag = capture[1].to_lowercase();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Remote document row as stored in the record table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub original_path: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(rename = "file_size", default)]
    pub size: u64,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    pub workspace_id: String,
    #[serde(rename = "sprint_folder", default)]
    pub group: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "updated_by", default)]
    pub last_editor: Option<String>,
}

impl DocumentRecord {
    /// Local path for this record (original path, falling back to filename).
    pub fn path(&self) -> &str {
        self.original_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.filename)
    }
}

/// Listing projection of a record: everything reconciliation needs, no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub original_path: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "file_size", default)]
    pub size: u64,
}

impl RecordSummary {
    pub fn path(&self) -> &str {
        self.original_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.filename)
    }
}

impl From<&DocumentRecord> for RecordSummary {
    fn from(record: &DocumentRecord) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            original_path: record.original_path.clone(),
            updated_at: record.updated_at,
            size: record.size,
        }
    }
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> WatchFilter {
        WatchFilter::new([".md", "TXT"], 1024)
    }

    #[test]
    fn test_filter_accepts_allowed_extensions() {
        let filter = filter();
        assert!(filter.accepts("notes.md"));
        assert!(filter.accepts("q3/Report.MD"));
        assert!(filter.accepts("todo.txt"));
        assert!(!filter.accepts("image.png"));
        assert!(!filter.accepts("README"));
    }

    #[test]
    fn test_filter_rejects_hidden_and_escaping_paths() {
        let filter = filter();
        assert_eq!(
            filter.check_path(".obsidian/notes.md"),
            Err(ValidationError::Ignored(".obsidian/notes.md".into()))
        );
        assert!(!filter.accepts("q3/.draft.md"));
        assert!(!filter.accepts("../outside.md"));
        assert!(!filter.accepts("/etc/notes.md"));
        assert!(!filter.accepts("a//b.md"));
    }

    #[test]
    fn test_safe_relative_paths() {
        assert!(is_safe_relative_path("q3/report.md"));
        assert!(!is_safe_relative_path("q3/../../etc/passwd"));
        assert!(!is_safe_relative_path("C:\\notes.md"));
        assert!(!is_safe_relative_path(""));
    }

    #[test]
    fn test_filter_size_ceiling() {
        let filter = filter();
        assert!(filter.check_size("a.md", 1024).is_ok());
        assert_eq!(
            filter.check_size("a.md", 1025),
            Err(ValidationError::TooLarge {
                path: "a.md".into(),
                size: 1025,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_document_derives_attributes() {
        let now = Utc::now();
        let doc = Document::new(
            "q3/report.md",
            "# Report\n#Sprint #q3 #sprint",
            "ws-1",
            "Alice",
            now,
        );

        assert_eq!(doc.filename, "report.md");
        assert_eq!(doc.group.as_deref(), Some("q3"));
        assert_eq!(doc.mime_type, "text/markdown");
        assert_eq!(doc.tags, vec!["sprint".to_string(), "q3".to_string()]);
        assert_eq!(doc.size, doc.content.len() as u64);
        assert_eq!(doc.storage_key(), "ws-1/q3/report.md");
    }

    #[test]
    fn test_root_document_has_no_group() {
        let doc = Document::new("notes.txt", "plain", "ws-1", "Bob", Utc::now());
        assert_eq!(doc.group, None);
        assert_eq!(doc.mime_type, "text/plain");
        assert_eq!(doc.storage_key(), "ws-1/notes.txt");
    }

    #[test]
    fn test_storage_key_is_deterministic() {
        let first = Document::new("q3/a.md", "v1", "ws", "Alice", Utc::now());
        let second = Document::new("q3/a.md", "v2 with more text", "ws", "Bob", Utc::now());
        assert_eq!(first.storage_key(), second.storage_key());
        assert_eq!(storage_key("ws", Some(""), "a.md"), "ws/a.md");
    }

    #[test]
    fn test_headings_are_not_tags() {
        assert!(extract_tags("# Title\n## Section\n").is_empty());
    }

    #[test]
    fn test_record_decodes_wire_names_and_nulls() {
        let json = r#"{
            "id": "abc",
            "filename": "report.md",
            "original_path": "q3/report.md",
            "content": null,
            "file_size": 42,
            "mime_type": "text/markdown",
            "storage_path": "ws/q3/report.md",
            "workspace_id": "ws",
            "sprint_folder": "q3",
            "tags": null,
            "updated_at": "2026-10-16T12:00:00.123456+00:00"
        }"#;

        let record: DocumentRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.path(), "q3/report.md");
        assert_eq!(record.size, 42);
        assert_eq!(record.group.as_deref(), Some("q3"));
        assert!(record.tags.is_empty());
        assert!(record.content.is_empty());
        assert_eq!(record.last_editor, None);
    }

    #[test]
    fn test_record_path_falls_back_to_filename() {
        let json = r#"{"id":"1","filename":"a.md","original_path":"","workspace_id":"ws","updated_at":"2026-01-01T00:00:00Z"}"#;
        let summary: RecordSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.path(), "a.md");
    }
}
