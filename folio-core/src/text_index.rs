use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::{source_name, PageSource};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{PageSize, Transform};

/// A contiguous span of extracted text sharing one transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub transform: Transform,
    /// Advance width of the whole run in document units.
    pub width: f32,
    pub height: Option<f32>,
}

impl TextRun {
    pub fn new(text: impl Into<String>, transform: Transform, width: f32) -> Self {
        Self {
            text: text.into(),
            transform,
            width,
            height: None,
        }
    }

    pub fn with_height(mut self, height: f32) -> Self {
        self.height = Some(height);
        self
    }

    /// Explicit height when the extractor gave a usable one, the font size
    /// otherwise.
    pub fn line_height(&self) -> f32 {
        match self.height {
            Some(height) if height > 0.0 && height.is_finite() => height,
            _ => self.transform.scale_factor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based.
    pub index: usize,
    pub size: PageSize,
    pub runs: Vec<TextRun>,
    /// Set when text extraction failed; `runs` is then empty.
    pub extraction_failed: bool,
}

/// Extracted text of every page of a fixed-page document.
#[derive(Debug, Clone, Default)]
pub struct TextIndex {
    pages: Vec<Page>,
}

impl TextIndex {
    pub fn from_pages(mut pages: Vec<Page>) -> Self {
        pages.sort_by_key(|page| page.index);
        Self { pages }
    }

    /// Extracts pages `1..=page_count`. A page whose text cannot be read is
    /// kept with no runs; only a page whose size cannot be read at all makes
    /// the document unreadable.
    pub fn build(source: &dyn PageSource, page_count: usize) -> EngineResult<Self> {
        let mut pages = Vec::with_capacity(page_count);
        for index in 1..=page_count {
            let size = source.page_size(index).map_err(|err| {
                EngineError::unreadable(source_name(source.info()), format!("page {index}: {err:#}"))
            })?;
            let (runs, extraction_failed) = match source.text_runs(index) {
                Ok(runs) => (runs, false),
                Err(err) => {
                    let failure = EngineError::PageExtractionFailed {
                        page: index,
                        reason: format!("{err:#}"),
                    };
                    warn!(error = %failure, "excluding page from text index");
                    (Vec::new(), true)
                }
            };
            pages.push(Page {
                index,
                size,
                runs,
                extraction_failed,
            });
        }
        debug!(pages = pages.len(), "built text index");
        Ok(Self { pages })
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages
            .binary_search_by_key(&index, |page| page.index)
            .ok()
            .map(|pos| &self.pages[pos])
    }

    pub fn failed_pages(&self) -> Vec<usize> {
        self.pages
            .iter()
            .filter(|page| page.extraction_failed)
            .map(|page| page.index)
            .collect()
    }

    pub fn page_text(&self, index: usize) -> Option<String> {
        self.page(index).map(|page| {
            page.runs
                .iter()
                .map(|run| run.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }
}
