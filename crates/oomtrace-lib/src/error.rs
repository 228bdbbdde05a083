//! Error types for oomtrace

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by evidence retrieval and run setup
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Invalid job id '{0}': expected a non-negative integer")]
    InvalidJobId(String),

    #[error("Required tool '{0}' was not found on PATH")]
    ToolMissing(String),

    #[error("Input directory does not exist: {}", .0.display())]
    InputDirMissing(PathBuf),

    #[error("No diagnostic bundles found under {}", .0.display())]
    NoBundles(PathBuf),

    #[error("Source '{source_name}' unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        TraceError::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Setup-time errors abort the run; the rest are local to one source
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TraceError::SourceUnavailable { .. })
    }
}

pub type Result<T, E = TraceError> = std::result::Result<T, E>;
