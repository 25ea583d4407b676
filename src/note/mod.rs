//! Note metadata and its derived fields.

pub mod codec;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::fingerprint;

/// Upper bound on the stored excerpt, in characters.
pub const EXCERPT_MAX_CHARS: usize = 160;

/// Markdown heading markers stripped before building an excerpt.
static HEADING_MARKERS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());
static WHITESPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteStatus {
    #[default]
    Draft,
    Favorite,
    Archived,
}

impl NoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Draft => "draft",
            NoteStatus::Favorite => "favorite",
            NoteStatus::Archived => "archived",
        }
    }

    /// Lenient parse for values read back from the index. Unknown labels
    /// fall back to draft rather than failing the whole row.
    pub fn parse(value: &str) -> NoteStatus {
        match value {
            "favorite" => NoteStatus::Favorite,
            "archived" => NoteStatus::Archived,
            _ => NoteStatus::Draft,
        }
    }
}

/// The identity and description of one note, independent of storage tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub id: String,
    /// Kept consistent with the on-disk file name; the filename wins when
    /// the two disagree because files can be renamed outside the app.
    pub title: String,
    pub tags: Vec<String>,
    pub created: DateTime<Utc>,
    /// Advisory only. Change detection goes through the content hash.
    pub modified: DateTime<Utc>,
    pub progress: f64,
    pub status: NoteStatus,
    pub word_count: usize,
    pub char_count: usize,
    pub content_hash: String,
    pub excerpt: String,
    /// Vault-relative path with `/` separators. Empty only transiently
    /// before the first write.
    pub path: String,
}

impl NoteMetadata {
    /// Fresh metadata for a note appearing at `rel_path`, with derived
    /// fields computed from `body`.
    pub fn new(rel_path: &str, body: &str, now: DateTime<Utc>) -> Self {
        let mut meta = NoteMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            title: title_from_filename(rel_path),
            tags: Vec::new(),
            created: now,
            modified: now,
            progress: 0.0,
            status: NoteStatus::Draft,
            word_count: 0,
            char_count: 0,
            content_hash: String::new(),
            excerpt: String::new(),
            path: rel_path.to_string(),
        };
        meta.refresh_derived(body);
        meta
    }

    /// Recompute everything derived from the body. Writers always call this;
    /// readers never trust cached header values for change detection.
    pub fn refresh_derived(&mut self, body: &str) {
        self.word_count = body.split_whitespace().count();
        self.char_count = body.chars().count();
        self.content_hash = fingerprint::content_hash(body);
        self.excerpt = excerpt_of(body);
        self.progress = self.progress.clamp(0.0, 1.0);
        dedup_in_place(&mut self.tags);
    }

    /// Folder component of `path`, empty for notes at the vault root.
    pub fn folder_path(&self) -> &str {
        match self.path.rfind('/') {
            Some(pos) => &self.path[..pos],
            None => "",
        }
    }

    /// File-name component of `path`.
    pub fn filename(&self) -> &str {
        match self.path.rfind('/') {
            Some(pos) => &self.path[pos + 1..],
            None => &self.path,
        }
    }
}

/// The authoritative title for a note: its file stem.
pub fn title_from_filename(rel_path: &str) -> String {
    Path::new(rel_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Bounded preview of a body: heading markers stripped, whitespace
/// collapsed, cut at `EXCERPT_MAX_CHARS`.
pub fn excerpt_of(body: &str) -> String {
    let stripped = HEADING_MARKERS.replace_all(body, "");
    let collapsed = WHITESPACE_RUNS.replace_all(stripped.trim(), " ");
    collapsed.chars().take(EXCERPT_MAX_CHARS).collect()
}

/// Deduplicate while preserving first-seen order.
fn dedup_in_place(tags: &mut Vec<String>) {
    let mut seen = HashSet::new();
    tags.retain(|t| seen.insert(t.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_filename() {
        assert_eq!(title_from_filename("Grocery List.md"), "Grocery List");
        assert_eq!(title_from_filename("Projects/Work/plan.md"), "plan");
    }

    #[test]
    fn test_new_computes_derived_fields() {
        let meta = NoteMetadata::new("a/b.md", "hello world\n", Utc::now());
        assert_eq!(meta.word_count, 2);
        assert_eq!(meta.char_count, 12);
        assert_eq!(meta.excerpt, "hello world");
        assert!(!meta.content_hash.is_empty());
        assert_eq!(meta.title, "b");
        assert_eq!(meta.path, "a/b.md");
    }

    #[test]
    fn test_excerpt_strips_headings_and_collapses_whitespace() {
        let body = "# Title\n\nFirst   paragraph\nwith a break.";
        assert_eq!(excerpt_of(body), "Title First paragraph with a break.");
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let body = "word ".repeat(200);
        assert!(excerpt_of(&body).chars().count() <= EXCERPT_MAX_CHARS);
    }

    #[test]
    fn test_refresh_derived_clamps_progress_and_dedups_tags() {
        let mut meta = NoteMetadata::new("n.md", "", Utc::now());
        meta.progress = 3.5;
        meta.tags = vec!["a".into(), "b".into(), "a".into()];
        meta.refresh_derived("");
        assert_eq!(meta.progress, 1.0);
        assert_eq!(meta.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_folder_path_and_filename() {
        let mut meta = NoteMetadata::new("Projects/Work/plan.md", "", Utc::now());
        assert_eq!(meta.folder_path(), "Projects/Work");
        assert_eq!(meta.filename(), "plan.md");
        meta.path = "root.md".into();
        assert_eq!(meta.folder_path(), "");
        assert_eq!(meta.filename(), "root.md");
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(NoteStatus::parse("favorite"), NoteStatus::Favorite);
        assert_eq!(NoteStatus::parse("archived"), NoteStatus::Archived);
        assert_eq!(NoteStatus::parse("anything else"), NoteStatus::Draft);
        assert_eq!(NoteStatus::parse(NoteStatus::Favorite.as_str()), NoteStatus::Favorite);
    }
}
