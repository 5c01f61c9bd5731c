use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the core components.
///
/// Only `ConfigLoadFailed` is fatal; everything else is caught at the tick or
/// message that produced it and converted into a log line or a failure reply.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to launch {path}: {reason}")]
    LaunchFailed { path: PathBuf, reason: String },

    #[error("failed to terminate process {pid}: {reason}")]
    TerminateFailed { pid: u32, reason: String },

    #[error("failed to read pixel at ({x}, {y}): {reason}")]
    PixelReadFailed { x: i32, y: i32, reason: String },

    #[error("completion service error: {0}")]
    CompletionService(String),

    #[error("failed to load config {path}: {reason}")]
    ConfigLoadFailed { path: PathBuf, reason: String },

    #[error("attachment download failed: {0}")]
    AttachmentDownloadFailed(String),

    #[error("failed to write {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("clipboard unavailable: {0}")]
    Clipboard(String),

    #[error("failed to send keys {keys}: {reason}")]
    KeySend { keys: String, reason: String },
}

pub type CoreResult<T> = Result<T, CoreError>;
