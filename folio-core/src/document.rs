use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::flow::{FlowPosition, FlowRange};
use crate::geometry::PageSize;
use crate::text_index::{TextIndex, TextRun};
use crate::{DocumentInfo, RenderImage, RenderRequest};

/// Where a reader is, or where something points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    /// 1-based page of a fixed-page document.
    Page { page: usize },
    Flow { position: FlowPosition },
}

impl Location {
    pub fn page(page: usize) -> Self {
        Location::Page { page }
    }

    pub fn page_number(&self) -> Option<usize> {
        match self {
            Location::Page { page } => Some(*page),
            Location::Flow { .. } => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Page { page } => write!(f, "page {page}"),
            Location::Flow { position } => write!(f, "{position}"),
        }
    }
}

/// Native outline target, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// 0-based page index as stored by paginated formats.
    PageIndex(usize),
    /// Named destination to be looked up in the document's name tree.
    Named(String),
    /// Content-document reference (`chapter.xhtml#anchor`) in a reflowable
    /// package.
    Href(String),
}

/// One entry of a document's native outline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutlineEntry {
    pub title: String,
    pub destination: Option<Destination>,
    pub children: Vec<OutlineEntry>,
}

impl OutlineEntry {
    pub fn new(title: impl Into<String>, destination: Option<Destination>) -> Self {
        Self {
            title: title.into(),
            destination,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<OutlineEntry>) -> Self {
        self.children = children;
        self
    }
}

/// A hit reported by a flow engine's own text query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMatch {
    pub range: FlowRange,
    pub excerpt: String,
    /// Character range of the hit inside `excerpt`.
    pub start: usize,
    pub end: usize,
}

/// Rasterizer and text source for a paginated document. Page numbers are
/// 1-based throughout.
pub trait PageSource: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn page_count(&self) -> Result<usize>;
    fn page_size(&self, page: usize) -> Result<PageSize>;
    /// Text runs of one page in rendering order.
    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>>;
    fn outline(&self) -> Result<Vec<OutlineEntry>>;
    /// Resolves a destination to a 1-based page number.
    fn resolve_destination(&self, destination: &Destination) -> Result<usize>;
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage>;
}

/// Layout engine for a reflowable document.
pub trait FlowEngine: Send + Sync {
    fn info(&self) -> &DocumentInfo;
    fn start(&self) -> FlowPosition;
    /// Native, case-insensitive text query, hits in flow order.
    fn search(&self, query: &str) -> Result<Vec<FlowMatch>>;
    fn outline(&self) -> Result<Vec<OutlineEntry>>;
    fn resolve_destination(&self, destination: &Destination) -> Result<FlowPosition>;
    /// Range covered by a live selection between two endpoints.
    fn selection_range(&self, anchor: &FlowPosition, focus: &FlowPosition) -> Result<FlowRange>;
    fn text_in_range(&self, range: &FlowRange) -> Result<String>;
    /// Renders the section containing `range` with the range marked.
    fn render_section(&self, range: &FlowRange) -> Result<String>;
}

#[async_trait::async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, source: &Path) -> Result<Document>;
}

#[derive(Clone)]
pub struct FixedPageDocument {
    source: Arc<dyn PageSource>,
    page_count: usize,
}

impl FixedPageDocument {
    /// Fails with `DocumentUnreadable` when not even the page count can be
    /// read.
    pub fn new(source: Arc<dyn PageSource>) -> EngineResult<Self> {
        let page_count = source
            .page_count()
            .map_err(|err| EngineError::unreadable(source_name(source.info()), format!("{err:#}")))?;
        if page_count == 0 {
            return Err(EngineError::unreadable(
                source_name(source.info()),
                "document has no pages",
            ));
        }
        Ok(Self { source, page_count })
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn source(&self) -> &Arc<dyn PageSource> {
        &self.source
    }

    pub fn page_size(&self, page: usize) -> EngineResult<PageSize> {
        self.check_page(page)?;
        self.source.page_size(page).map_err(|err| {
            EngineError::unreadable(source_name(self.source.info()), format!("{err:#}"))
        })
    }

    #[instrument(skip(self), fields(pages = self.page_count))]
    pub fn extract_text(&self) -> EngineResult<TextIndex> {
        TextIndex::build(self.source.as_ref(), self.page_count)
    }

    pub fn render(&self, request: RenderRequest) -> EngineResult<RenderImage> {
        self.check_page(request.page)?;
        self.source.render_page(request).map_err(|err| {
            EngineError::unreadable(source_name(self.source.info()), format!("{err:#}"))
        })
    }

    fn check_page(&self, page: usize) -> EngineResult<()> {
        if page == 0 || page > self.page_count {
            return Err(EngineError::PageOutOfRange {
                page,
                page_count: self.page_count,
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReflowableDocument {
    engine: Arc<dyn FlowEngine>,
}

impl ReflowableDocument {
    pub fn new(engine: Arc<dyn FlowEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<dyn FlowEngine> {
        &self.engine
    }
}

/// A loaded document, either fixed-page or reflowable.
#[derive(Clone)]
pub enum Document {
    FixedPage(FixedPageDocument),
    Reflowable(ReflowableDocument),
}

impl Document {
    pub fn info(&self) -> &DocumentInfo {
        match self {
            Document::FixedPage(doc) => doc.source.info(),
            Document::Reflowable(doc) => doc.engine.info(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Document::FixedPage(_) => "fixed-page",
            Document::Reflowable(_) => "reflowable",
        }
    }

    /// Page count, or `None` for an unbounded flow.
    pub fn extent(&self) -> Option<usize> {
        match self {
            Document::FixedPage(doc) => Some(doc.page_count),
            Document::Reflowable(_) => None,
        }
    }

    pub fn start(&self) -> Location {
        match self {
            Document::FixedPage(_) => Location::page(1),
            Document::Reflowable(doc) => Location::Flow {
                position: doc.engine.start(),
            },
        }
    }

    pub fn as_fixed(&self) -> Option<&FixedPageDocument> {
        match self {
            Document::FixedPage(doc) => Some(doc),
            Document::Reflowable(_) => None,
        }
    }

    /// Native outline. A broken outline is logged and treated as absent.
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let outline = match self {
            Document::FixedPage(doc) => doc.source.outline(),
            Document::Reflowable(doc) => doc.engine.outline(),
        };
        outline.unwrap_or_else(|err| {
            warn!(
                ?err,
                document = %source_name(self.info()),
                "failed to read document outline"
            );
            Vec::new()
        })
    }

    pub fn resolve_destination(&self, destination: &Destination) -> Result<Location> {
        match self {
            Document::FixedPage(doc) => {
                let page = doc.source.resolve_destination(destination)?;
                anyhow::ensure!(
                    (1..=doc.page_count).contains(&page),
                    "destination points at page {} of {}",
                    page,
                    doc.page_count
                );
                Ok(Location::page(page))
            }
            Document::Reflowable(doc) => {
                let position = doc.engine.resolve_destination(destination)?;
                Ok(Location::Flow { position })
            }
        }
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("kind", &self.kind_name())
            .field("source", &self.info().source)
            .field("extent", &self.extent())
            .finish()
    }
}

pub(crate) fn source_name(info: &DocumentInfo) -> String {
    info.source.display().to_string()
}
