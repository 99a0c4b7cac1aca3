use std::path::PathBuf;

use thiserror::Error;

use crate::SearchGeneration;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure taxonomy of the reading engine.
///
/// Only [`EngineError::DocumentUnreadable`] is meant to reach the reader as a
/// hard failure. Page extraction and destination failures are recovered where
/// they happen and surface here only so they can be logged or recorded.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document {source_name} is unreadable: {reason}")]
    DocumentUnreadable { source_name: String, reason: String },

    #[error("failed to extract text from page {page}: {reason}")]
    PageExtractionFailed { page: usize, reason: String },

    #[error("outline entry {title:?} has no resolvable destination: {reason}")]
    DestinationUnresolved { title: String, reason: String },

    #[error("search generation {generation} was superseded by {current}")]
    StaleSearchDiscarded {
        generation: SearchGeneration,
        current: SearchGeneration,
    },

    #[error("unsupported document format for {0:?}")]
    UnsupportedFormat(PathBuf),

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("selection is empty")]
    EmptySelection,

    #[error("selection cannot be resolved: {0}")]
    InvalidSelection(String),

    #[error("{operation} is not available for {document} documents")]
    CapabilityMismatch {
        operation: &'static str,
        document: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn unreadable(source_name: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DocumentUnreadable {
            source_name: source_name.into(),
            reason: err.to_string(),
        }
    }

    /// Whether the reader has to be told about this failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DocumentUnreadable { .. })
    }
}
