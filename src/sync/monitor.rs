//! Triggers for incremental passes.
//!
//! Two interchangeable strategies behind one [`ChangeSource`] trait:
//! filesystem notifications with a debounce window, or a fixed-interval
//! poll. The monitor picks the watcher at runtime and falls back to
//! polling when the platform cannot deliver notifications (sandboxed
//! filesystems, some network mounts). Both strategies survive any number
//! of start/stop cycles without leaking the underlying OS resource.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::SyncResult;
use crate::sync::Reconciler;
use crate::vault::NOTE_EXTENSION;

/// Quiet window after the last filesystem event before a pass fires, so a
/// burst of writes coalesces into one pass.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Poll cadence of the fallback strategy.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

/// A strategy that decides when an incremental pass should run.
pub trait ChangeSource: Send {
    fn start(&mut self, on_change: ChangeCallback) -> SyncResult<()>;
    fn stop(&mut self);
}

/// Event-driven strategy: a recursive watcher plus a debounce thread.
pub struct NotifySource {
    root: PathBuf,
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
}

impl NotifySource {
    pub fn new(root: PathBuf, debounce: Duration) -> Self {
        NotifySource {
            root,
            debounce,
            watcher: None,
            thread: None,
        }
    }
}

impl ChangeSource for NotifySource {
    fn start(&mut self, on_change: ChangeCallback) -> SyncResult<()> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let debounce = self.debounce;
        let root = self.root.clone();
        let handle = thread::spawn(move || {
            let mut last_event: Option<Instant> = None;

            loop {
                match rx.recv_timeout(debounce) {
                    Ok(Ok(event)) => {
                        if event
                            .paths
                            .iter()
                            .any(|p| is_note_event(p.strip_prefix(&root).unwrap_or(p)))
                        {
                            last_event = Some(Instant::now());
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("[monitor] watcher error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        // Fire only once the burst has gone quiet.
                        if let Some(seen) = last_event {
                            if seen.elapsed() >= debounce {
                                last_event = None;
                                on_change();
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("[monitor] watcher thread stopped");
        });

        self.watcher = Some(watcher);
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the watcher releases the OS handle and closes the event
        // channel, which ends the debounce thread.
        self.watcher = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Events worth a pass: note files anywhere outside hidden directories.
/// Expects a vault-relative path; the caller strips the root prefix.
fn is_note_event(path: &Path) -> bool {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if extension != NOTE_EXTENSION {
        return false;
    }
    !path.components().any(|c| {
        matches!(c, std::path::Component::Normal(name)
            if name.to_string_lossy().starts_with('.'))
    })
}

/// Polling strategy: a plain thread waking on a fixed interval.
pub struct PollingSource {
    interval: Duration,
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollingSource {
    pub fn new(interval: Duration) -> Self {
        PollingSource {
            interval,
            stop_tx: None,
            thread: None,
        }
    }
}

impl ChangeSource for PollingSource {
    fn start(&mut self, on_change: ChangeCallback) -> SyncResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let handle = thread::spawn(move || {
            loop {
                match rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => on_change(),
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            log::debug!("[monitor] polling thread stopped");
        });

        self.stop_tx = Some(tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender wakes the thread out of its wait.
        self.stop_tx = None;
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PollingSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Schedules incremental passes for one [`Reconciler`].
pub struct ChangeMonitor {
    reconciler: Arc<Reconciler>,
    debounce: Duration,
    poll_interval: Duration,
    source: Option<Box<dyn ChangeSource>>,
}

impl ChangeMonitor {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        ChangeMonitor {
            reconciler,
            debounce: DEFAULT_DEBOUNCE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            source: None,
        }
    }

    pub fn with_intervals(mut self, debounce: Duration, poll_interval: Duration) -> Self {
        self.debounce = debounce;
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_running(&self) -> bool {
        self.source.is_some()
    }

    /// Start watching the vault. Tries the native watcher first and falls
    /// back to polling when it cannot be created. Idempotent while running.
    pub fn start(&mut self) -> SyncResult<()> {
        if self.source.is_some() {
            return Ok(());
        }

        let reconciler = Arc::clone(&self.reconciler);
        // A failed pass must never disable monitoring; the next trigger
        // simply retries from scratch.
        let on_change: ChangeCallback = Arc::new(move || {
            if let Err(e) = reconciler.run_quick_sync() {
                log::warn!("[monitor] quick pass failed, will retry on next trigger: {}", e);
            }
        });

        let root = self.reconciler.vault().root().to_path_buf();
        let mut watcher = Box::new(NotifySource::new(root, self.debounce));
        match watcher.start(Arc::clone(&on_change)) {
            Ok(()) => {
                log::info!("[monitor] watching vault for changes");
                self.source = Some(watcher);
            }
            Err(e) => {
                log::warn!("[monitor] watcher unavailable ({}), falling back to polling", e);
                let mut poller = Box::new(PollingSource::new(self.poll_interval));
                poller.start(on_change)?;
                self.source = Some(poller);
            }
        }
        Ok(())
    }

    /// Stop watching and release the underlying OS resource. Safe to call
    /// repeatedly; the monitor can be started again afterwards.
    pub fn stop(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
            log::info!("[monitor] stopped");
        }
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_polling_source_fires_and_stops() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let mut source = PollingSource::new(Duration::from_millis(20));
        source
            .start(Arc::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        thread::sleep(Duration::from_millis(120));
        source.stop();
        let count = fired.load(Ordering::SeqCst);
        assert!(count >= 2, "expected at least two ticks, got {}", count);

        // No further ticks after stop.
        thread::sleep(Duration::from_millis(60));
        assert_eq!(fired.load(Ordering::SeqCst), count);
    }

    #[test]
    fn test_polling_source_restarts_cleanly() {
        let fired = Arc::new(AtomicUsize::new(0));

        let mut source = PollingSource::new(Duration::from_millis(15));
        for _ in 0..3 {
            let fired_clone = Arc::clone(&fired);
            source
                .start(Arc::new(move || {
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            thread::sleep(Duration::from_millis(40));
            source.stop();
        }
        assert!(fired.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_is_note_event_filters_hidden_and_foreign() {
        assert!(is_note_event(Path::new("note.md")));
        assert!(is_note_event(Path::new("sub/note.md")));
        assert!(!is_note_event(Path::new(".trash/note.md")));
        assert!(!is_note_event(Path::new("image.png")));
        assert!(!is_note_event(Path::new(".note.md.vaultsync-tmp")));
    }
}
