//! Serialization of a note to and from a single text file.
//!
//! The on-disk format is a YAML frontmatter header between `---` fences,
//! followed by the markdown body:
//!
//! ```text
//! ---
//! id: "9f0c..."
//! title: "Grocery List"
//! ...
//! ---
//!
//! body text
//! ```
//!
//! Derived fields may be cached in the header for other tools to read, but
//! they are advisory. The sync pass recomputes them from the body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::note::{NoteMetadata, NoteStatus};

/// The metadata header embedded in a note file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteHeader {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub status: NoteStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

impl NoteHeader {
    pub fn from_metadata(meta: &NoteMetadata) -> Self {
        NoteHeader {
            id: meta.id.clone(),
            title: meta.title.clone(),
            tags: meta.tags.clone(),
            created: meta.created,
            modified: meta.modified,
            progress: meta.progress,
            status: meta.status,
            word_count: Some(meta.word_count),
            char_count: Some(meta.char_count),
            content_hash: Some(meta.content_hash.clone()),
            excerpt: Some(meta.excerpt.clone()),
        }
    }

    /// Materialize full metadata for a note read from `rel_path`. Derived
    /// fields come from the body, not from whatever the header cached.
    pub fn into_metadata(self, rel_path: &str, body: &str) -> NoteMetadata {
        let mut meta = NoteMetadata {
            id: self.id,
            title: self.title,
            tags: self.tags,
            created: self.created,
            modified: self.modified,
            progress: self.progress,
            status: self.status,
            word_count: 0,
            char_count: 0,
            content_hash: String::new(),
            excerpt: String::new(),
            path: rel_path.to_string(),
        };
        meta.refresh_derived(body);
        meta
    }
}

/// Split a file into header and body. A file without an opening fence (or
/// without a closing one) decodes to `(None, whole text)` so externally
/// authored files can be adopted instead of rejected. A fence whose YAML
/// fails to parse is an error.
pub fn decode(content: &str) -> SyncResult<(Option<NoteHeader>, String)> {
    if !content.starts_with("---") {
        return Ok((None, content.to_string()));
    }

    if let Some(end_idx) = content[3..].find("\n---") {
        let yaml_str = &content[3..end_idx + 3];
        let body_start = end_idx + 3 + 4; // skip "\n---"
        let body = if body_start < content.len() {
            content[body_start..].trim_start_matches('\n').to_string()
        } else {
            String::new()
        };

        match serde_yaml::from_str::<NoteHeader>(yaml_str) {
            Ok(header) => Ok((Some(header), body)),
            Err(e) => Err(SyncError::Codec(format!("invalid frontmatter: {}", e))),
        }
    } else {
        // No closing fence, treat as headerless.
        Ok((None, content.to_string()))
    }
}

/// Combine a header and body into file text.
pub fn encode(header: &NoteHeader, body: &str) -> SyncResult<String> {
    let yaml = serde_yaml::to_string(header)?;
    Ok(format!("---\n{}\n---\n\n{}", yaml.trim(), body))
}
