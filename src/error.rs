use std::path::PathBuf;
use thiserror::Error;

/// Structural failures that abort a sync pass. Per-file problems inside a
/// pass are logged and counted in the pass statistics instead of being
/// propagated through this type.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("vault root does not exist: {0}")]
    RootMissing(PathBuf),
    #[error("index store failure: {0}")]
    Index(String),
    #[error("io failure: {0}")]
    Io(String),
    #[error("malformed note header: {0}")]
    Codec(String),
    #[error("graph mutation failed: {0}")]
    Graph(String),
    #[error("file watcher failure: {0}")]
    Watch(String),
    #[error("vault is locked by {hostname} (pid {pid})")]
    Locked { hostname: String, pid: u32 },
}

impl From<std::io::Error> for SyncError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Index(value.to_string())
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value.to_string())
    }
}

impl From<notify::Error> for SyncError {
    fn from(value: notify::Error) -> Self {
        Self::Watch(value.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
