//! Error types for the result engine

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that stop the engine from starting or loading its resources.
///
/// Per-frame problems (no detection, ambiguous matches, rejected or duplicate
/// results) are not errors; they are reported as [`crate::FrameOutcome`]s.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` was called while the worker thread is alive
    #[error("result engine already running")]
    AlreadyRunning,

    /// The configured template directory is missing or unreadable
    #[error("template directory {path:?} is not readable: {source}")]
    TemplateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A single template file could not be used
    #[error("invalid template {path:?}: {reason}")]
    InvalidTemplate { path: PathBuf, reason: String },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    /// The frame source could not be opened
    #[error("frame source {path:?} unavailable: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while acquiring a frame
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source is temporarily unable to deliver a frame; worth retrying
    #[error("frame temporarily unavailable: {0}")]
    Transient(String),

    /// A frame file exists but could not be decoded
    #[error("failed to decode frame {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The source has gone away for good
    #[error("frame source disconnected: {0}")]
    Disconnected(String),
}

impl CaptureError {
    /// Whether retrying the acquisition may succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, CaptureError::Disconnected(_))
    }
}

/// Errors raised by OCR backends
#[derive(Debug, Error)]
pub enum OcrError {
    /// Backend binary or library is not installed / not reachable
    #[error("OCR backend '{0}' is unavailable")]
    Unavailable(String),

    /// Backend ran but failed
    #[error("OCR backend '{backend}' failed: {message}")]
    Failed { backend: String, message: String },

    #[error("failed to encode OCR input: {0}")]
    Encode(#[from] image::ImageError),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}
