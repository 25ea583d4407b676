//! The reconciliation passes.
//!
//! A pass flows one direction: file store, then change detection, then the
//! index, then the graph projection. Four ordered phases make up a full
//! pass: enumerate, identity repair, diff against the index, tombstone.
//! A quick pass runs the same per-file logic over only the files modified
//! since the last completed pass and never tombstones; the full pass stays
//! the authority for correctness.

pub mod monitor;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::error::SyncResult;
use crate::fingerprint::{self, ChangeDecision};
use crate::graph::{GraphProjector, MemoryGraph, NoteGraph};
use crate::index::IndexStore;
use crate::note::codec::NoteHeader;
use crate::note::{title_from_filename, NoteMetadata};
use crate::vault::{NoteHandle, VaultStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Full,
    Quick,
}

/// Statistics accumulated over one pass. Also the answer handed to callers
/// that lose the single-flight race, so it is cheap to clone.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub pass: PassKind,
    pub files_scanned: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// Hash mismatches where the timestamps pointed the other way and the
    /// file won anyway.
    pub conflicts_resolved: usize,
    /// Duplicate identities healed by assigning a fresh id.
    pub ids_reassigned: usize,
    /// Embedded titles rewritten to match the authoritative filename.
    pub titles_repaired: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncStats {
    fn new(pass: PassKind) -> Self {
        SyncStats {
            pass,
            files_scanned: 0,
            added: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
            conflicts_resolved: 0,
            ids_reassigned: 0,
            titles_repaired: 0,
            errors: 0,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// True when the pass made no mutation of any kind.
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl Default for SyncStats {
    fn default() -> Self {
        SyncStats {
            started_at: DateTime::<Utc>::UNIX_EPOCH,
            ..SyncStats::new(PassKind::Full)
        }
    }
}

/// Releases the single-flight guard even when a pass errors out.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The reconciliation engine. Owns its index handle, file store and graph
/// mutator; construct one instance and pass it to whatever needs
/// synchronization.
pub struct Reconciler {
    vault: VaultStore,
    index: IndexStore,
    graph: Mutex<Box<dyn NoteGraph>>,
    in_flight: AtomicBool,
    last_stats: Mutex<Option<SyncStats>>,
    last_pass_at: Mutex<Option<DateTime<Utc>>>,
}

impl Reconciler {
    pub fn new(vault: VaultStore, index: IndexStore, graph: Box<dyn NoteGraph>) -> Self {
        Reconciler {
            vault,
            index,
            graph: Mutex::new(graph),
            in_flight: AtomicBool::new(false),
            last_stats: Mutex::new(None),
            last_pass_at: Mutex::new(None),
        }
    }

    /// Engine over `vault_root` with the index database stored under the
    /// vault's hidden state directory and an in-memory folder graph.
    pub fn with_defaults(vault_root: impl Into<PathBuf>) -> SyncResult<Self> {
        let vault = VaultStore::open(vault_root)?;
        let state_dir = vault.root().join(".vaultsync");
        std::fs::create_dir_all(&state_dir)?;
        let index = IndexStore::open(&state_dir.join("index.sqlite"))?;
        Ok(Self::new(vault, index, Box::new(MemoryGraph::new())))
    }

    pub fn vault(&self) -> &VaultStore {
        &self.vault
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// Run a closure against the graph, under the same lock the projection
    /// takes, so callers never observe a half-projected hierarchy.
    pub fn with_graph<R>(&self, f: impl FnOnce(&dyn NoteGraph) -> R) -> R {
        let graph = self.graph.lock().unwrap_or_else(|p| p.into_inner());
        f(graph.as_ref())
    }

    /// Statistics of the most recent completed pass.
    pub fn last_sync_stats(&self) -> Option<SyncStats> {
        self.last_stats
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn run_full_sync(&self) -> SyncResult<SyncStats> {
        self.run_guarded(PassKind::Full)
    }

    pub fn run_quick_sync(&self) -> SyncResult<SyncStats> {
        self.run_guarded(PassKind::Quick)
    }

    /// Single-flight: only one pass at a time. A caller arriving while a
    /// pass runs is answered immediately with the previous pass's
    /// statistics instead of blocking or queueing.
    fn run_guarded(&self, kind: PassKind) -> SyncResult<SyncStats> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("[sync] pass already in flight, returning previous stats");
            return Ok(self.last_sync_stats().unwrap_or_default());
        }
        let _guard = InFlightGuard(&self.in_flight);

        let result = self.run_pass(kind);
        match &result {
            Ok(stats) => {
                log::info!(
                    "[sync] {:?} pass done in {}ms: {} scanned, +{} ~{} -{} ({} conflicts, {} errors)",
                    kind,
                    stats.duration_ms,
                    stats.files_scanned,
                    stats.added,
                    stats.updated,
                    stats.deleted,
                    stats.conflicts_resolved,
                    stats.errors
                );
                *self.last_stats.lock().unwrap_or_else(|p| p.into_inner()) = Some(stats.clone());
            }
            Err(e) => log::error!("[sync] {:?} pass aborted: {}", kind, e),
        }
        result
    }

    fn run_pass(&self, kind: PassKind) -> SyncResult<SyncStats> {
        let mut stats = SyncStats::new(kind);
        let started = stats.started_at;

        // Phase 1: enumerate. This set is the ground truth for the rest of
        // the pass. The quick pass narrows it to files touched since the
        // last completed pass.
        let mut handles = self.vault.list_notes()?;
        if kind == PassKind::Quick {
            let cutoff = *self.last_pass_at.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(cutoff) = cutoff {
                handles.retain(|h| h.modified > cutoff);
            }
        }
        stats.files_scanned = handles.len();

        // Reads and header parsing fan out; everything order-dependent
        // below stays sequential.
        let loaded: Vec<(NoteHandle, SyncResult<(Option<NoteHeader>, String)>)> = handles
            .into_par_iter()
            .map(|h| {
                let read = self.vault.read(&h.rel_path);
                (h, read)
            })
            .collect();

        // Phase 2: identity repair, in enumeration order.
        let ready = self.repair_identities(loaded, &mut stats);

        // Phase 3: diff against the index.
        let mut pending = self.index.snapshot()?;
        for meta in ready {
            let previous = pending.remove(&meta.id);
            let (apply, is_update, conflict) = match previous {
                None => (true, false, false),
                Some(entry) => match fingerprint::decide(
                    &entry.content_hash,
                    entry.modified,
                    &meta.content_hash,
                    meta.modified,
                ) {
                    ChangeDecision::Unchanged => {
                        // The body is identical but the identity may have
                        // drifted (rename, repaired title).
                        let drifted = entry.path != meta.path || entry.title != meta.title;
                        (drifted, drifted, false)
                    }
                    ChangeDecision::FileWins { tiebreak_conflict } => {
                        (true, true, tiebreak_conflict)
                    }
                },
            };

            if !apply {
                stats.unchanged += 1;
                continue;
            }
            if conflict {
                log::info!(
                    "[sync] index was newer than file {} but hashes differ, file wins",
                    meta.path
                );
            }
            match self.index.upsert(&meta) {
                Ok(()) => {
                    if is_update {
                        stats.updated += 1;
                        if conflict {
                            stats.conflicts_resolved += 1;
                        }
                    } else {
                        stats.added += 1;
                    }
                }
                Err(e) => {
                    log::warn!("[sync] failed to index {}: {}", meta.path, e);
                    stats.errors += 1;
                }
            }
        }

        // Phase 4: tombstone. Only the full pass may conclude that an
        // unseen index entry means a deleted file.
        if kind == PassKind::Full {
            for (id, entry) in pending {
                if VaultStore::is_trash_path(&entry.path) {
                    log::debug!("[sync] dropping trashed entry {}", entry.path);
                } else {
                    log::info!("[sync] tombstoning {} ({})", entry.path, id);
                }
                match self.index.delete(&id) {
                    Ok(true) => stats.deleted += 1,
                    Ok(false) => {}
                    Err(e) => {
                        log::warn!("[sync] failed to tombstone {}: {}", id, e);
                        stats.errors += 1;
                    }
                }
            }
        }

        // Project the reconciled index into the folder graph, one lock
        // scope per pass.
        {
            let mut graph = self.graph.lock().unwrap_or_else(|p| p.into_inner());
            let outcome = GraphProjector::project(&self.index, graph.as_mut(), &self.vault)?;
            stats.errors += outcome.notes_unattached;
        }

        stats.duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        // Anchor the next quick pass at this pass's start so files touched
        // while we were running are picked up again.
        *self.last_pass_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(started);
        Ok(stats)
    }

    /// Phase 2. Walks the enumerated set in order, adopts headerless files,
    /// enforces filename authority over the embedded title and heals
    /// duplicate identities. The lexicographically first file keeps a
    /// contested id.
    fn repair_identities(
        &self,
        loaded: Vec<(NoteHandle, SyncResult<(Option<NoteHeader>, String)>)>,
        stats: &mut SyncStats,
    ) -> Vec<NoteMetadata> {
        let mut seen_ids: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut ready = Vec::with_capacity(loaded.len());

        for (handle, read) in loaded {
            let (header, body) = match read {
                Ok(v) => v,
                Err(e) => {
                    log::warn!("[sync] skipping {}: {}", handle.rel_path, e);
                    stats.errors += 1;
                    continue;
                }
            };

            let mut dirty = false;
            let mut meta = match header {
                Some(h) => h.into_metadata(&handle.rel_path, &body),
                None => {
                    // External file without a header: adopt it with a fresh
                    // identity and timestamps from the filesystem.
                    log::info!("[sync] adopting headerless file {}", handle.rel_path);
                    dirty = true;
                    NoteMetadata::new(&handle.rel_path, &body, handle.modified)
                }
            };

            let stem = title_from_filename(&handle.rel_path);
            if meta.title != stem {
                log::info!(
                    "[sync] renaming embedded title {:?} -> {:?} for {}",
                    meta.title,
                    stem,
                    handle.rel_path
                );
                meta.title = stem;
                meta.modified = Utc::now();
                stats.titles_repaired += 1;
                dirty = true;
            }

            if let Some(original) = seen_ids.get(&meta.id) {
                let fresh = Uuid::new_v4().to_string();
                log::warn!(
                    "[sync] duplicate id {} at {} (original kept by {}), reassigning {}",
                    meta.id,
                    handle.rel_path,
                    original,
                    fresh
                );
                meta.id = fresh;
                meta.modified = Utc::now();
                stats.ids_reassigned += 1;
                dirty = true;
            }
            seen_ids.insert(meta.id.clone(), handle.rel_path.clone());

            if dirty {
                if let Err(e) =
                    self.vault
                        .write(&handle.rel_path, &NoteHeader::from_metadata(&meta), &body)
                {
                    // The repair could not be persisted; indexing the
                    // repaired identity anyway would diverge from disk.
                    log::warn!("[sync] failed to rewrite {}: {}", handle.rel_path, e);
                    stats.errors += 1;
                    continue;
                }
            }

            ready.push(meta);
        }

        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> Reconciler {
        Reconciler::new(
            VaultStore::open(dir.path()).unwrap(),
            IndexStore::open_in_memory().unwrap(),
            Box::new(MemoryGraph::new()),
        )
    }

    #[test]
    fn test_pass_over_empty_vault() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        assert!(engine.last_sync_stats().is_none());
        let stats = engine.run_full_sync().unwrap();
        assert_eq!(stats.files_scanned, 0);
        assert!(stats.is_noop());
        assert_eq!(stats.errors, 0);
        assert!(engine.last_sync_stats().is_some());
    }

    #[test]
    fn test_single_flight_answers_with_previous_stats() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        let first = engine.run_full_sync().unwrap();

        // Simulate a pass holding the guard.
        engine.in_flight.store(true, Ordering::Release);
        let answered = engine.run_quick_sync().unwrap();
        assert_eq!(answered.started_at, first.started_at);
        assert_eq!(answered.pass, PassKind::Full);
        engine.in_flight.store(false, Ordering::Release);
    }

    #[test]
    fn test_guard_released_after_structural_error() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        // Remove the root out from under the engine.
        drop(dir);

        assert!(engine.run_full_sync().is_err());
        // The next attempt must not be answered as "in flight".
        assert!(!engine.in_flight.load(Ordering::Acquire));
    }
}
