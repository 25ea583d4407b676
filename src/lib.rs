//! vaultsync keeps three representations of a notes vault mutually
//! consistent: the markdown files on disk (canonical), a SQLite index with
//! a full-text shadow table (queryable), and a hierarchical folder graph
//! (navigable). It is built for out-of-band edits: files renamed, copied or
//! deleted behind the application's back, and an index that fell behind
//! after a crash.
//!
//! The engine consumes a narrow file interface ([`vault::VaultStore`]) and
//! a narrow graph-mutation interface ([`graph::NoteGraph`]) and exposes a
//! small synchronization surface:
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaultsync::{ChangeMonitor, Reconciler};
//!
//! # fn main() -> vaultsync::SyncResult<()> {
//! let engine = Arc::new(Reconciler::with_defaults("/path/to/vault")?);
//! let stats = engine.run_full_sync()?;
//! println!("indexed {} notes", stats.added);
//!
//! let mut monitor = ChangeMonitor::new(Arc::clone(&engine));
//! monitor.start()?;
//! // ... the monitor now runs quick passes as the vault changes ...
//! monitor.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Files are the durable source of truth. On any disagreement the engine
//! repairs in the file's favor: embedded titles follow the filename, body
//! changes are detected by content hash rather than timestamps, and
//! duplicate identities created by copying a file are healed with fresh
//! ids.

pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod index;
pub mod lock;
pub mod note;
pub mod sync;
pub mod vault;

pub use error::{SyncError, SyncResult};
pub use graph::{FolderId, FolderInfo, GraphProjector, MemoryGraph, NoteGraph};
pub use index::{IndexStore, SortField};
pub use lock::{WriterLock, WriterLockInfo};
pub use note::codec::NoteHeader;
pub use note::{NoteMetadata, NoteStatus};
pub use sync::monitor::{ChangeMonitor, ChangeSource, NotifySource, PollingSource};
pub use sync::{PassKind, Reconciler, SyncStats};
pub use vault::{NoteHandle, VaultStore};
