//! File-store access for a notes vault.
//!
//! A vault is a directory tree of `.md` files. Hidden components (anything
//! starting with `.`, which covers the `.trash` subtree and the crate's own
//! `.vaultsync` state directory) are never enumerated.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::error::{SyncError, SyncResult};
use crate::note::codec::{self, NoteHeader};

pub const NOTE_EXTENSION: &str = "md";
pub const TRASH_DIR: &str = ".trash";

/// Handle to one enumerated note: its vault-relative path plus the
/// modification time captured at enumeration.
#[derive(Debug, Clone)]
pub struct NoteHandle {
    pub rel_path: String,
    pub modified: DateTime<Utc>,
}

pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    /// Open an existing vault directory. A missing root is a structural
    /// error; nothing is created implicitly.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(SyncError::RootMissing(root));
        }
        Ok(VaultStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerate every note file under the root, sorted lexicographically by
    /// relative path. The sort order doubles as the duplicate-identity
    /// policy: when two files share an id, the lexicographically first one
    /// keeps it.
    pub fn list_notes(&self) -> SyncResult<Vec<NoteHandle>> {
        if !self.root.is_dir() {
            return Err(SyncError::RootMissing(self.root.clone()));
        }

        let mut handles = Vec::new();
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || !self.is_note_path(path) {
                continue;
            }
            let rel = match self.rel_path(path) {
                Some(rel) => rel,
                None => continue,
            };
            let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(t) => DateTime::<Utc>::from(t),
                None => {
                    log::warn!("[vault] no mtime for {}, treating as just modified", rel);
                    Utc::now()
                }
            };
            handles.push(NoteHandle {
                rel_path: rel,
                modified,
            });
        }

        handles.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        Ok(handles)
    }

    /// Read and decode one note.
    pub fn read(&self, rel_path: &str) -> SyncResult<(Option<NoteHeader>, String)> {
        let content = fs::read_to_string(self.root.join(rel_path))
            .map_err(|e| SyncError::Io(format!("failed to read {}: {}", rel_path, e)))?;
        codec::decode(&content)
    }

    /// Encode and write one note atomically: temp file in the same
    /// directory, then rename, so a watcher never sees a half-written file.
    pub fn write(&self, rel_path: &str, header: &NoteHeader, body: &str) -> SyncResult<()> {
        let abs = self.root.join(rel_path);
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SyncError::Io(format!("failed to create {:?}: {}", parent, e)))?;
        }
        let content = codec::encode(header, body)?;
        atomic_write(&abs, content.as_bytes())
    }

    /// Current modification time of one note file.
    pub fn modified_time(&self, rel_path: &str) -> SyncResult<DateTime<Utc>> {
        let meta = fs::metadata(self.root.join(rel_path))
            .map_err(|e| SyncError::Io(format!("failed to stat {}: {}", rel_path, e)))?;
        let modified = meta
            .modified()
            .map_err(|e| SyncError::Io(format!("no mtime for {}: {}", rel_path, e)))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    /// Relative paths of every non-hidden directory under the root. Used to
    /// tell intentionally empty folders apart from stale graph structure.
    pub fn list_folders(&self) -> SyncResult<Vec<String>> {
        if !self.root.is_dir() {
            return Err(SyncError::RootMissing(self.root.clone()));
        }

        let mut dirs = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            // The root itself may carry a hidden name (tempdirs often do);
            // only prune hidden names below it.
            .filter_entry(|e| e.depth() == 0 || !is_hidden_name(e.file_name().to_string_lossy().as_ref()))
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                if let Some(rel) = self.rel_path(entry.path()) {
                    dirs.push(rel);
                }
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Whether a path lies under the recognized trash directory.
    pub fn is_trash_path(rel_path: &str) -> bool {
        rel_path == TRASH_DIR || rel_path.starts_with(&format!("{}/", TRASH_DIR))
    }

    /// Vault-relative form of an absolute path, with `/` separators.
    pub fn rel_path(&self, abs: &Path) -> Option<String> {
        abs.strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    fn is_note_path(&self, path: &Path) -> bool {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if extension != NOTE_EXTENSION {
            return false;
        }
        // Skip temp files from atomic writes and anything in a hidden
        // directory, including the trash.
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        for component in relative.components() {
            if let std::path::Component::Normal(name) = component {
                if is_hidden_name(name.to_string_lossy().as_ref()) {
                    return false;
                }
            }
        }
        true
    }
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

fn atomic_write(path: &Path, content: &[u8]) -> SyncResult<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!(".{}.vaultsync-tmp", file_name));

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| SyncError::Io(format!("failed to create temp file {:?}: {}", temp_path, e)))?;
    file.write_all(content)
        .map_err(|e| SyncError::Io(format!("failed to write temp file {:?}: {}", temp_path, e)))?;
    file.sync_all()
        .map_err(|e| SyncError::Io(format!("failed to sync temp file {:?}: {}", temp_path, e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| SyncError::Io(format!("failed to rename {:?} -> {:?}: {}", temp_path, path, e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteMetadata;
    use tempfile::TempDir;

    fn seed_note(root: &Path, rel: &str, body: &str) {
        let abs = root.join(rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        let meta = NoteMetadata::new(rel, body, Utc::now());
        let text = codec::encode(&NoteHeader::from_metadata(&meta), body).unwrap();
        fs::write(abs, text).unwrap();
    }

    #[test]
    fn test_open_missing_root_fails() {
        assert!(matches!(
            VaultStore::open("/nonexistent/vault/path"),
            Err(SyncError::RootMissing(_))
        ));
    }

    #[test]
    fn test_list_notes_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        seed_note(dir.path(), "b.md", "two");
        seed_note(dir.path(), "a.md", "one");
        seed_note(dir.path(), "sub/c.md", "three");
        seed_note(dir.path(), ".trash/gone.md", "trashed");
        seed_note(dir.path(), ".hidden/secret.md", "hidden");
        fs::write(dir.path().join("not-a-note.txt"), "skip").unwrap();

        let vault = VaultStore::open(dir.path()).unwrap();
        let paths: Vec<String> = vault
            .list_notes()
            .unwrap()
            .into_iter()
            .map(|h| h.rel_path)
            .collect();
        assert_eq!(paths, vec!["a.md", "b.md", "sub/c.md"]);
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let vault = VaultStore::open(dir.path()).unwrap();

        let body = "alpha\n\nbeta";
        let meta = NoteMetadata::new("sub/note.md", body, Utc::now());
        vault
            .write("sub/note.md", &NoteHeader::from_metadata(&meta), body)
            .unwrap();

        let (header, read_body) = vault.read("sub/note.md").unwrap();
        assert_eq!(read_body, body);
        assert_eq!(header.unwrap().id, meta.id);
        assert!(vault.modified_time("sub/note.md").is_ok());
    }

    #[test]
    fn test_list_folders_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Projects/Archive")).unwrap();
        fs::create_dir_all(dir.path().join(".trash/old")).unwrap();

        let vault = VaultStore::open(dir.path()).unwrap();
        let folders = vault.list_folders().unwrap();
        assert_eq!(folders, vec!["Projects", "Projects/Archive"]);
    }

    #[test]
    fn test_trash_path_detection() {
        assert!(VaultStore::is_trash_path(".trash/note.md"));
        assert!(VaultStore::is_trash_path(".trash"));
        assert!(!VaultStore::is_trash_path("notes/.trash.md"));
        assert!(!VaultStore::is_trash_path("a.md"));
    }
}
