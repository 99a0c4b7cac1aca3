use std::convert::TryFrom;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use folio_core::document::{Destination, OutlineEntry, PageSource};
use folio_core::geometry::{PageSize, Transform};
use folio_core::text_index::TextRun;
use folio_core::{
    Document, DocumentFormat, DocumentInfo, DocumentMetadata, DocumentProvider, FixedPageDocument,
    RenderImage, RenderRequest,
};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::{instrument, warn};

/// Environment variable naming an explicit pdfium library to bind.
pub const PDFIUM_LIBRARY_ENV: &str = "FOLIO_PDFIUM_LIBRARY_PATH";

pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_env() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    async fn open(&self, path: &Path) -> Result<Document> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let info = build_document_info(&self.pdfium, &absolute)?;
        let source = PdfiumPageSource::new(Arc::clone(&self.pdfium), absolute, info);
        Ok(Document::FixedPage(FixedPageDocument::new(Arc::new(source))?))
    }
}

/// Page source backed by one pdfium document, opened lazily and kept open.
pub struct PdfiumPageSource {
    info: DocumentInfo,
    path: PathBuf,
    cache: Mutex<Option<RenderCacheEntry>>,
    outline_cache: Mutex<Option<Vec<OutlineEntry>>>,
    document: Mutex<Option<PdfDocument<'static>>>,
    pdfium: Arc<Pdfium>,
}

struct RenderCacheEntry {
    page: usize,
    scale: f32,
    image: RenderImage,
}

impl PdfiumPageSource {
    fn new(pdfium: Arc<Pdfium>, path: PathBuf, info: DocumentInfo) -> Self {
        Self {
            info,
            path,
            cache: Mutex::new(None),
            outline_cache: Mutex::new(None),
            document: Mutex::new(None),
            pdfium,
        }
    }

    fn open_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_file(&self.path, None)
            .with_context(|| format!("failed to open {:?}", self.path))?;
        // SAFETY: the document borrows the bindings owned by `self.pdfium`. It
        // lives in `self.document`, which is declared before `pdfium` and so is
        // dropped first; the bindings outlive every cached document.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.open_document()?);
        }
        match guard.as_ref() {
            Some(document) => f(document),
            None => Err(anyhow!("{:?} is not loaded", self.path)),
        }
    }

    fn with_page<R, F>(&self, page: usize, f: F) -> Result<R>
    where
        F: FnOnce(&PdfPage<'_>) -> Result<R>,
    {
        self.with_document(|document| {
            let index = page
                .checked_sub(1)
                .and_then(|index| PdfPageIndex::try_from(index).ok())
                .ok_or_else(|| anyhow!("page {} is out of supported range", page))?;
            let pdf_page = document
                .pages()
                .get(index)
                .with_context(|| format!("page {} out of range", page))?;
            f(&pdf_page)
        })
    }
}

impl PageSource for PdfiumPageSource {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_count(&self) -> Result<usize> {
        self.info
            .page_count
            .ok_or_else(|| anyhow!("page count unavailable for {:?}", self.path))
    }

    fn page_size(&self, page: usize) -> Result<PageSize> {
        self.with_page(page, |pdf_page| {
            Ok(PageSize::new(pdf_page.width().value, pdf_page.height().value))
        })
    }

    /// One run per pdfium text segment. Segment bounds are already in page
    /// space with a bottom-left origin, so the baseline is the bottom edge.
    #[instrument(skip(self))]
    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>> {
        self.with_page(page, |pdf_page| {
            let text = pdf_page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page))?;
            let mut runs = Vec::new();
            for segment in text.segments().iter() {
                let content = segment.text();
                if content.trim().is_empty() {
                    continue;
                }
                let bounds = segment.bounds();
                let left = bounds.left().value;
                let bottom = bounds.bottom().value;
                let width = (bounds.right().value - left).max(0.0);
                let height = (bounds.top().value - bottom).max(0.0);
                runs.push(
                    TextRun::new(content, Transform::text_at(height, left, bottom), width)
                        .with_height(height),
                );
            }
            Ok(runs)
        })
    }

    fn outline(&self) -> Result<Vec<OutlineEntry>> {
        {
            let cache = self.outline_cache.lock();
            if let Some(cached) = cache.as_ref() {
                return Ok(cached.clone());
            }
        }

        let outline = self.with_document(|document| {
            Ok(document
                .bookmarks()
                .root()
                .map(collect_outline)
                .unwrap_or_default())
        })?;

        let mut cache = self.outline_cache.lock();
        *cache = Some(outline.clone());

        Ok(outline)
    }

    fn resolve_destination(&self, destination: &Destination) -> Result<usize> {
        match destination {
            Destination::PageIndex(index) => Ok(index + 1),
            Destination::Named(name) => {
                bail!("named destination {name:?} was not resolved when the outline was read")
            }
            Destination::Href(href) => bail!("{href:?} is not a pdf destination"),
        }
    }

    #[instrument(skip(self))]
    fn render_page(&self, request: RenderRequest) -> Result<RenderImage> {
        {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.page == request.page && (entry.scale - request.scale).abs() < f32::EPSILON {
                    return Ok(entry.image.clone());
                }
            }
        }

        let image = self.with_page(request.page, |pdf_page| {
            let config = PdfRenderConfig::new().scale_page_by_factor(request.scale.max(0.1));
            let bitmap = pdf_page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", request.page))?;
            let pixels = bitmap.as_image().to_rgba8().into_raw();
            Ok(RenderImage {
                width: u32::try_from(bitmap.width()).unwrap_or_default(),
                height: u32::try_from(bitmap.height()).unwrap_or_default(),
                pixels,
            })
        })?;

        let mut cache = self.cache.lock();
        *cache = Some(RenderCacheEntry {
            page: request.page,
            scale: request.scale,
            image: image.clone(),
        });

        Ok(image)
    }
}

/// Builds the outline tree starting at `first` and its siblings.
fn collect_outline(first: PdfBookmark<'_>) -> Vec<OutlineEntry> {
    let mut entries = Vec::new();
    let mut current = Some(first);
    while let Some(bookmark) = current {
        let title = bookmark.title().unwrap_or_default();
        let destination = bookmark
            .destination()
            .and_then(|destination| destination.page_index().ok())
            .map(|index| Destination::PageIndex(index as usize));
        if destination.is_none() {
            warn!(%title, "bookmark has no page destination");
        }
        let children = bookmark.first_child().map(collect_outline).unwrap_or_default();
        entries.push(OutlineEntry::new(title, destination).with_children(children));
        current = bookmark.next_sibling();
    }
    entries
}

fn build_document_info(pdfium: &Pdfium, path: &Path) -> Result<DocumentInfo> {
    let document = pdfium
        .load_pdf_from_file(path, None)
        .with_context(|| format!("failed to open {:?}", path))?;
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();

    let title = metadata
        .get(PdfDocumentMetadataTagType::Title)
        .map(|t| t.value().to_owned());
    let author = metadata
        .get(PdfDocumentMetadataTagType::Author)
        .map(|t| t.value().to_owned());

    Ok(DocumentInfo::new(path.to_path_buf(), DocumentFormat::Pdf)
        .with_page_count(page_count)
        .with_metadata(DocumentMetadata { title, author }))
}

fn bind_pdfium_from_env() -> Option<Pdfium> {
    match std::env::var(PDFIUM_LIBRARY_ENV) {
        Ok(path) if !path.is_empty() => match Pdfium::bind_to_library(&path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load Pdfium from {} ({}): {}",
                    path, PDFIUM_LIBRARY_ENV, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");

    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("{}: {}", cwd_path.display(), err));
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; set {} or install it ({})",
                PDFIUM_LIBRARY_ENV,
                errors.join(", ")
            ))
        }
    }
}
