use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Path does not exist: {0}")]
    PathNotFound(PathBuf),

    #[error("Path is not being watched: {0}")]
    NotWatched(PathBuf),

    #[error("Watch for {0} is no longer held by the backend")]
    WatchNotFound(PathBuf),

    #[error("File watcher is not running")]
    NotRunning,

    #[error("File watcher is already running")]
    AlreadyRunning,

    #[error("Watch backend error: {0}")]
    Backend(String),

    #[error("Watch backend is unavailable")]
    BackendUnavailable,

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<WatchError>,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid glob pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        WatchError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;
