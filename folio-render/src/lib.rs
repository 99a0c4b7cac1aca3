//! Document collaborators for the reading engine: pdfium for fixed-page
//! documents and an EPUB flow engine for reflowable ones.

pub mod epub;
#[cfg(feature = "pdf")]
pub mod pdf;

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use folio_core::{Document, DocumentFormat, DocumentProvider};
use tracing::{info, instrument, warn};

pub use crate::epub::{EpubFlowEngine, EpubProvider};
#[cfg(feature = "pdf")]
pub use crate::pdf::{PdfiumPageSource, PdfiumProvider};

/// Opens any supported document, choosing the backend from the file
/// extension.
pub struct FormatProvider {
    #[cfg(feature = "pdf")]
    pdf: Option<PdfiumProvider>,
    epub: EpubProvider,
}

impl FormatProvider {
    /// Binds pdfium if it is available. Without it EPUB files still open.
    pub fn new() -> Self {
        #[cfg(feature = "pdf")]
        let pdf = match PdfiumProvider::new() {
            Ok(provider) => Some(provider),
            Err(err) => {
                warn!(?err, "pdf support disabled");
                None
            }
        };
        Self {
            #[cfg(feature = "pdf")]
            pdf,
            epub: EpubProvider::new(),
        }
    }

    /// A provider that only opens EPUB files.
    pub fn epub_only() -> Self {
        Self {
            #[cfg(feature = "pdf")]
            pdf: None,
            epub: EpubProvider::new(),
        }
    }

    #[cfg(feature = "pdf")]
    fn pdf_provider(&self) -> Result<&dyn DocumentProvider> {
        match self.pdf.as_ref() {
            Some(provider) => Ok(provider),
            None => bail!("pdf support is unavailable: no pdfium library could be bound"),
        }
    }

    #[cfg(not(feature = "pdf"))]
    fn pdf_provider(&self) -> Result<&dyn DocumentProvider> {
        bail!("pdf support is unavailable: built without the pdf feature")
    }
}

impl Default for FormatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentProvider for FormatProvider {
    #[instrument(skip(self))]
    async fn open(&self, source: &Path) -> Result<Document> {
        let format = DocumentFormat::from_path(source)?;
        info!(%format, "opening document");
        match format {
            DocumentFormat::Pdf => self.pdf_provider()?.open(source).await,
            DocumentFormat::Epub => self.epub.open(source).await,
        }
    }
}
