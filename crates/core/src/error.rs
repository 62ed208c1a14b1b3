use std::path::PathBuf;

use thiserror::Error;

use crate::types::ClickRole;

/// Screen or region could not be sampled. Always transient for callers.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no display available")]
    NoDisplay,
    #[error("capture region is empty")]
    EmptyRegion,
    #[error("capture backend failed: {0}")]
    Backend(String),
}

/// Settings that make a run or a stage impossible.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("detection region is not set")]
    MissingDetectionRegion,
    #[error("{0} click point is not set")]
    MissingClickPoint(ClickRole),
    #[error("channel switch needs 4 click points, {bound} bound")]
    IncompleteChannelPoints { bound: usize },
    #[error("settings cannot change while a run is active")]
    RunActive,
    #[error("a run is already active")]
    AlreadyRunning,
    #[error("failed to read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}
