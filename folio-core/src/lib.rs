//! Reading engine for paginated (PDF) and reflowable (EPUB) documents.

pub mod annotations;
pub mod config;
pub mod debounce;
pub mod document;
pub mod error;
pub mod flow;
pub mod geometry;
pub mod navigation;
pub mod search;
pub mod session;
pub mod store;
pub mod text_index;
pub mod toc;
pub mod windowing;

use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use annotations::{
    AnnotationManager, Highlight, HighlightColor, HighlightId, HighlightLocation, HighlightSink,
    MemoryHighlightSink, Selection,
};
pub use config::EngineConfig;
pub use debounce::SearchDebouncer;
pub use document::{
    Destination, Document, DocumentProvider, FixedPageDocument, FlowEngine, FlowMatch, Location,
    OutlineEntry, PageSource, ReflowableDocument,
};
pub use error::{EngineError, EngineResult};
pub use flow::{FlowPosition, FlowRange};
pub use geometry::{DocumentRect, PageSize, Point, Rect, Transform};
pub use navigation::{NavigationState, NavigationStateMachine, SearchSummary, SearchTicket};
pub use search::{MatchLocation, SearchMatch};
pub use session::{Command, ReaderSession, SessionEvent};
pub use store::{FileStateStore, MemoryStateStore, PersistedReaderState, StateStore};
pub use text_index::{TextIndex, TextRun};
pub use toc::{TocNode, TocTree};
pub use windowing::{PageRect, ScrollSnapshot, ViewportWindowManager, WindowSettings, WindowState};

pub type DocumentId = Uuid;

/// Monotonic counter identifying one search request.
pub type SearchGeneration = u64;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f9a1c52-7d0e-5b8a-9c41-f2e6d8a0b714").expect("valid namespace UUID")
});

/// Stable id for a document source: the same file always maps to the same id.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Epub,
}

impl DocumentFormat {
    /// Decides the format from the file extension alone.
    pub fn from_path(path: &Path) -> EngineResult<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("pdf") => Ok(DocumentFormat::Pdf),
            Some("epub") => Ok(DocumentFormat::Epub),
            _ => Err(EngineError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::Pdf => f.write_str("pdf"),
            DocumentFormat::Epub => f.write_str("epub"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: DocumentId,
    pub source: PathBuf,
    pub format: DocumentFormat,
    /// Fixed-page documents only.
    pub page_count: Option<usize>,
    pub metadata: DocumentMetadata,
}

impl DocumentInfo {
    pub fn new(source: PathBuf, format: DocumentFormat) -> Self {
        Self {
            id: document_id_for_path(&source),
            source,
            format,
            page_count: None,
            metadata: DocumentMetadata::default(),
        }
    }

    pub fn with_page_count(mut self, page_count: usize) -> Self {
        self.page_count = Some(page_count);
        self
    }

    pub fn with_metadata(mut self, metadata: DocumentMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One page rasterization request. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderRequest {
    pub page: usize,
    pub scale: f32,
}

impl Default for RenderRequest {
    fn default() -> Self {
        Self {
            page: 1,
            scale: 1.0,
        }
    }
}

/// RGBA8 pixels, row-major.
#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn document_id_is_stable_for_same_path() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("sample.pdf");
        std::fs::write(&file_path, b"dummy").unwrap();

        let first = document_id_for_path(&file_path);
        let second = document_id_for_path(&file_path);

        assert_eq!(first, second);
        assert_ne!(first, document_id_for_path(&dir.path().join("other.pdf")));
    }

    #[test]
    fn format_comes_from_extension_only() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("/b/Book.PDF")).unwrap(),
            DocumentFormat::Pdf
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("novel.epub")).unwrap(),
            DocumentFormat::Epub
        );
        assert!(matches!(
            DocumentFormat::from_path(Path::new("notes.txt")),
            Err(EngineError::UnsupportedFormat(_))
        ));
        assert!(DocumentFormat::from_path(Path::new("README")).is_err());
    }
}
