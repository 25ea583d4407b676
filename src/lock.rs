//! Single-active-writer guard for a vault.
//!
//! The engine assumes exactly one writer process per vault. A heartbeat
//! lock file in the vault's hidden state directory enforces that across
//! processes (and across devices when the vault lives on a synced share).
//! A holder that stops heartbeating is considered stale after a grace
//! period and its lock may be taken over.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

const LOCK_DIR: &str = ".vaultsync";
const LOCK_FILE: &str = "writer.lock";

/// Heartbeats older than this mark the holder as stale. Generous enough to
/// absorb sync delays when the lock file travels through a file-sync
/// service.
const STALE_THRESHOLD_SECS: i64 = 120;

/// How often the holder refreshes its heartbeat.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterLockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat: DateTime<Utc>,
}

impl WriterLockInfo {
    fn current() -> Self {
        let now = Utc::now();
        WriterLockInfo {
            pid: std::process::id(),
            hostname: local_hostname(),
            acquired_at: now,
            heartbeat: now,
        }
    }

    fn is_mine(&self) -> bool {
        self.pid == std::process::id() && self.hostname == local_hostname()
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.heartbeat).num_seconds() > STALE_THRESHOLD_SECS
    }
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

fn lock_file_path(root: &Path) -> PathBuf {
    root.join(LOCK_DIR).join(LOCK_FILE)
}

fn read_lock_file(path: &Path) -> SyncResult<WriterLockInfo> {
    let content =
        fs::read_to_string(path).map_err(|e| SyncError::Io(format!("failed to read lock: {}", e)))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write the lock file atomically so a reader never sees a torn record.
fn write_lock_file(path: &Path, info: &WriterLockInfo) -> SyncResult<()> {
    let content = serde_json::to_string_pretty(info)?;
    let temp_path = path.with_extension("lock.tmp");

    let mut file = fs::File::create(&temp_path)
        .map_err(|e| SyncError::Io(format!("failed to create temp lock: {}", e)))?;
    file.write_all(content.as_bytes())
        .map_err(|e| SyncError::Io(format!("failed to write temp lock: {}", e)))?;
    file.sync_all()
        .map_err(|e| SyncError::Io(format!("failed to sync temp lock: {}", e)))?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| SyncError::Io(format!("failed to rename lock: {}", e)))?;
    Ok(())
}

/// Held for as long as this process is the vault's writer. Released on drop.
pub struct WriterLock {
    lock_path: PathBuf,
    stop_tx: Option<mpsc::Sender<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl WriterLock {
    /// Acquire the writer lock for `root`. Fails with [`SyncError::Locked`]
    /// when another live holder has it; a stale holder is taken over with a
    /// warning.
    pub fn acquire(root: &Path) -> SyncResult<Self> {
        let lock_path = lock_file_path(root);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SyncError::Io(format!("failed to create {:?}: {}", parent, e)))?;
        }

        if lock_path.exists() {
            match read_lock_file(&lock_path) {
                Ok(existing) if existing.is_mine() => {
                    log::info!("[lock] reacquiring our own writer lock");
                }
                Ok(existing) if existing.is_stale(Utc::now()) => {
                    log::warn!(
                        "[lock] taking over stale lock from {} (pid {}, last heartbeat {})",
                        existing.hostname,
                        existing.pid,
                        existing.heartbeat
                    );
                }
                Ok(existing) => {
                    return Err(SyncError::Locked {
                        hostname: existing.hostname,
                        pid: existing.pid,
                    });
                }
                Err(e) => {
                    log::warn!("[lock] unreadable lock file, overwriting: {}", e);
                }
            }
        }

        let info = WriterLockInfo::current();
        write_lock_file(&lock_path, &info)?;
        log::info!("[lock] writer lock acquired for {:?}", root);

        // Heartbeat refresher. The channel doubles as the stop signal.
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let beat_path = lock_path.clone();
        let heartbeat = thread::spawn(move || {
            let mut info = info;
            loop {
                match stop_rx.recv_timeout(HEARTBEAT_INTERVAL) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        info.heartbeat = Utc::now();
                        if let Err(e) = write_lock_file(&beat_path, &info) {
                            log::error!("[lock] failed to refresh heartbeat: {}", e);
                        }
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(WriterLock {
            lock_path,
            stop_tx: Some(stop_tx),
            heartbeat: Some(heartbeat),
        })
    }

    /// Current holder of the lock for `root`, if any, with its staleness.
    pub fn holder(root: &Path) -> Option<(WriterLockInfo, bool)> {
        let lock_path = lock_file_path(root);
        if !lock_path.exists() {
            return None;
        }
        match read_lock_file(&lock_path) {
            Ok(info) => {
                let stale = info.is_stale(Utc::now());
                Some((info, stale))
            }
            Err(_) => None,
        }
    }

    /// Explicit release, for callers that want the error instead of the
    /// drop-time best effort.
    pub fn release(mut self) -> SyncResult<()> {
        self.shutdown();
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)
                .map_err(|e| SyncError::Io(format!("failed to remove lock: {}", e)))?;
            log::info!("[lock] writer lock released");
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.stop_tx = None;
        if let Some(handle) = self.heartbeat.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        self.shutdown();
        // Only remove the file if it is still ours; a takeover may have
        // replaced it.
        if let Ok(existing) = read_lock_file(&self.lock_path) {
            if existing.is_mine() {
                if let Err(e) = fs::remove_file(&self.lock_path) {
                    log::warn!("[lock] failed to remove lock file on drop: {}", e);
                }
            }
        }
    }
}
