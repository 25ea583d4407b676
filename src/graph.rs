//! Folder-hierarchy projection of the index.
//!
//! The object graph is a mutation seam: the engine drives it through the
//! [`NoteGraph`] trait and ships [`MemoryGraph`] as the in-crate
//! implementation. A host application with its own persistent object graph
//! implements the trait and hands the engine a boxed instance.

use std::collections::{HashMap, HashSet};

use crate::error::{SyncError, SyncResult};
use crate::index::{IndexStore, SortField};
use crate::note::NoteMetadata;
use crate::vault::VaultStore;

pub type FolderId = u64;

/// Read-only view of one folder node, used for pruning and inspection.
#[derive(Debug, Clone)]
pub struct FolderInfo {
    pub id: FolderId,
    pub name: String,
    /// Slash-joined logical path from the root, e.g. `Projects/Archive`.
    pub path: String,
    pub parent: Option<FolderId>,
    pub note_count: usize,
    pub child_count: usize,
}

/// Mutation interface of the hierarchical object graph.
pub trait NoteGraph: Send {
    /// Locate or create the folder `name` under `parent` (`None` meaning
    /// the root level). Folders match by name and parent together, so the
    /// same name under different parents yields distinct nodes.
    fn find_or_create_folder(&mut self, name: &str, parent: Option<FolderId>)
        -> SyncResult<FolderId>;

    /// Attach a note to a folder, or to the root when `folder` is `None`.
    fn attach_note(&mut self, folder: Option<FolderId>, note: &NoteMetadata) -> SyncResult<()>;

    /// Drop all note attachments, keeping the folder structure. Each
    /// projection pass re-attaches from scratch so notes whose paths moved
    /// end up under the right chain.
    fn detach_all_notes(&mut self);

    /// Delete a folder node. Only empty folders may be deleted.
    fn delete_folder(&mut self, id: FolderId) -> SyncResult<()>;

    fn folders(&self) -> Vec<FolderInfo>;
}

#[derive(Debug)]
struct FolderNode {
    name: String,
    parent: Option<FolderId>,
    children: Vec<FolderId>,
    notes: Vec<String>,
}

/// In-memory implementation of [`NoteGraph`].
#[derive(Debug, Default)]
pub struct MemoryGraph {
    nodes: HashMap<FolderId, FolderNode>,
    root_children: Vec<FolderId>,
    root_notes: Vec<String>,
    next_id: FolderId,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note ids attached directly to the root.
    pub fn root_notes(&self) -> &[String] {
        &self.root_notes
    }

    /// Note ids attached to the folder with the given logical path.
    pub fn notes_at(&self, path: &str) -> Option<Vec<String>> {
        self.folders()
            .into_iter()
            .find(|f| f.path == path)
            .map(|f| self.nodes[&f.id].notes.clone())
    }

    fn path_of(&self, id: FolderId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[&node_id];
            segments.push(node.name.clone());
            current = node.parent;
        }
        segments.reverse();
        segments.join("/")
    }

    fn siblings(&self, parent: Option<FolderId>) -> &[FolderId] {
        match parent {
            Some(p) => &self.nodes[&p].children,
            None => &self.root_children,
        }
    }
}

impl NoteGraph for MemoryGraph {
    fn find_or_create_folder(
        &mut self,
        name: &str,
        parent: Option<FolderId>,
    ) -> SyncResult<FolderId> {
        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                return Err(SyncError::Graph(format!("unknown parent folder {}", p)));
            }
        }

        if let Some(existing) = self
            .siblings(parent)
            .iter()
            .find(|id| self.nodes[*id].name == name)
        {
            return Ok(*existing);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(
            id,
            FolderNode {
                name: name.to_string(),
                parent,
                children: Vec::new(),
                notes: Vec::new(),
            },
        );
        match parent {
            Some(p) => self.nodes.get_mut(&p).unwrap().children.push(id),
            None => self.root_children.push(id),
        }
        Ok(id)
    }

    fn attach_note(&mut self, folder: Option<FolderId>, note: &NoteMetadata) -> SyncResult<()> {
        match folder {
            Some(id) => {
                let node = self
                    .nodes
                    .get_mut(&id)
                    .ok_or_else(|| SyncError::Graph(format!("unknown folder {}", id)))?;
                node.notes.push(note.id.clone());
            }
            None => self.root_notes.push(note.id.clone()),
        }
        Ok(())
    }

    fn detach_all_notes(&mut self) {
        self.root_notes.clear();
        for node in self.nodes.values_mut() {
            node.notes.clear();
        }
    }

    fn delete_folder(&mut self, id: FolderId) -> SyncResult<()> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| SyncError::Graph(format!("unknown folder {}", id)))?;
        if !node.children.is_empty() || !node.notes.is_empty() {
            return Err(SyncError::Graph(format!(
                "refusing to delete non-empty folder {}",
                self.path_of(id)
            )));
        }
        let parent = node.parent;
        self.nodes.remove(&id);
        match parent {
            Some(p) => {
                if let Some(parent_node) = self.nodes.get_mut(&p) {
                    parent_node.children.retain(|c| *c != id);
                }
            }
            None => self.root_children.retain(|c| *c != id),
        }
        Ok(())
    }

    fn folders(&self) -> Vec<FolderInfo> {
        let mut out: Vec<FolderInfo> = self
            .nodes
            .iter()
            .map(|(id, node)| FolderInfo {
                id: *id,
                name: node.name.clone(),
                path: self.path_of(*id),
                parent: node.parent,
                note_count: node.notes.len(),
                child_count: node.children.len(),
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}

/// Outcome of one projection pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectionOutcome {
    pub notes_attached: usize,
    pub notes_unattached: usize,
    pub folders_pruned: usize,
}

/// Materializes the index contents as the folder hierarchy and prunes
/// structure that no longer corresponds to anything on disk.
pub struct GraphProjector;

impl GraphProjector {
    /// Run after a sync pass, under one graph lock scope. A failure for a
    /// single note leaves that note unattached and the pass continues.
    pub fn project(
        index: &IndexStore,
        graph: &mut dyn NoteGraph,
        vault: &VaultStore,
    ) -> SyncResult<ProjectionOutcome> {
        let mut outcome = ProjectionOutcome::default();

        graph.detach_all_notes();
        for meta in index.list_all(SortField::Modified, false)? {
            match Self::attach(graph, &meta) {
                Ok(()) => outcome.notes_attached += 1,
                Err(e) => {
                    log::warn!("[graph] leaving {} unattached: {}", meta.path, e);
                    outcome.notes_unattached += 1;
                }
            }
        }

        outcome.folders_pruned = Self::prune(graph, vault)?;
        Ok(outcome)
    }

    fn attach(graph: &mut dyn NoteGraph, meta: &NoteMetadata) -> SyncResult<()> {
        let mut parent: Option<FolderId> = None;
        let folder_path = meta.folder_path();
        if !folder_path.is_empty() {
            for segment in folder_path.split('/') {
                parent = Some(graph.find_or_create_folder(segment, parent)?);
            }
        }
        graph.attach_note(parent, meta)
    }

    /// Delete folders with no notes and no children unless the matching
    /// directory still physically exists. Runs to a fixed point so a pruned
    /// leaf can expose its now-empty parent.
    fn prune(graph: &mut dyn NoteGraph, vault: &VaultStore) -> SyncResult<usize> {
        let physical: HashSet<String> = vault.list_folders()?.into_iter().collect();
        let mut pruned = 0;

        loop {
            let victims: Vec<FolderId> = graph
                .folders()
                .into_iter()
                .filter(|f| f.note_count == 0 && f.child_count == 0 && !physical.contains(&f.path))
                .map(|f| f.id)
                .collect();
            if victims.is_empty() {
                break;
            }
            for id in victims {
                match graph.delete_folder(id) {
                    Ok(()) => pruned += 1,
                    Err(e) => log::warn!("[graph] failed to prune folder: {}", e),
                }
            }
        }

        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn note(id: &str, path: &str) -> NoteMetadata {
        let mut m = NoteMetadata::new(path, "body", Utc::now());
        m.id = id.to_string();
        m
    }

    #[test]
    fn test_find_or_create_matches_by_name_and_parent() {
        let mut graph = MemoryGraph::new();
        let a = graph.find_or_create_folder("Projects", None).unwrap();
        let a_again = graph.find_or_create_folder("Projects", None).unwrap();
        assert_eq!(a, a_again);

        // Same name under a different parent is a distinct node.
        let nested = graph.find_or_create_folder("Projects", Some(a)).unwrap();
        assert_ne!(a, nested);

        let paths: Vec<String> = graph.folders().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["Projects", "Projects/Projects"]);
    }

    #[test]
    fn test_delete_refuses_non_empty() {
        let mut graph = MemoryGraph::new();
        let a = graph.find_or_create_folder("A", None).unwrap();
        graph.find_or_create_folder("B", Some(a)).unwrap();
        assert!(graph.delete_folder(a).is_err());
    }

    #[test]
    fn test_projection_attaches_notes_along_path() {
        let dir = TempDir::new().unwrap();
        let vault = VaultStore::open(dir.path()).unwrap();
        let index = IndexStore::open_in_memory().unwrap();
        index.upsert(&note("n1", "Projects/Work/plan.md")).unwrap();
        index.upsert(&note("n2", "root.md")).unwrap();

        let mut graph = MemoryGraph::new();
        let outcome = GraphProjector::project(&index, &mut graph, &vault).unwrap();

        assert_eq!(outcome.notes_attached, 2);
        assert_eq!(outcome.notes_unattached, 0);
        assert_eq!(graph.root_notes(), &["n2".to_string()]);
        assert_eq!(graph.notes_at("Projects/Work").unwrap(), vec!["n1".to_string()]);
        // Intermediate folders got created but not pruned: they have children.
        assert!(graph.notes_at("Projects").unwrap().is_empty());
    }

    #[test]
    fn test_pruning_preserves_physical_folders() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("Projects/Archive")).unwrap();
        let vault = VaultStore::open(dir.path()).unwrap();
        let index = IndexStore::open_in_memory().unwrap();

        let mut graph = MemoryGraph::new();
        // Stale structure left over from a previous projection.
        let projects = graph.find_or_create_folder("Projects", None).unwrap();
        graph.find_or_create_folder("Archive", Some(projects)).unwrap();
        let stale = graph.find_or_create_folder("Gone", None).unwrap();
        graph.find_or_create_folder("Deeper", Some(stale)).unwrap();

        let outcome = GraphProjector::project(&index, &mut graph, &vault).unwrap();

        // Gone/Deeper collapses bottom-up; Projects/Archive survives because
        // the directories exist on disk.
        assert_eq!(outcome.folders_pruned, 2);
        let paths: Vec<String> = graph.folders().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["Projects", "Projects/Archive"]);
    }

    #[test]
    fn test_moved_note_reprojects_under_new_chain() {
        let dir = TempDir::new().unwrap();
        let vault = VaultStore::open(dir.path()).unwrap();
        let index = IndexStore::open_in_memory().unwrap();
        index.upsert(&note("n1", "Old/plan.md")).unwrap();

        let mut graph = MemoryGraph::new();
        GraphProjector::project(&index, &mut graph, &vault).unwrap();
        assert!(graph.notes_at("Old").is_some());

        // The folder was renamed externally and the index re-reconciled.
        index.upsert(&note("n1", "New/plan.md")).unwrap();
        GraphProjector::project(&index, &mut graph, &vault).unwrap();

        assert_eq!(graph.notes_at("New").unwrap(), vec!["n1".to_string()]);
        assert!(graph.notes_at("Old").is_none());
    }
}
