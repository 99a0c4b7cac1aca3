use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::document::{source_name, Document};
use crate::error::{EngineError, EngineResult};
use crate::flow::{FlowPosition, FlowRange};
use crate::geometry::{DocumentRect, Rect};
use crate::{DocumentId, DocumentInfo};

pub type HighlightId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, SerializeDisplay, DeserializeFromStr)]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Orange,
    Custom(String),
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HighlightColor::Yellow => f.write_str("yellow"),
            HighlightColor::Green => f.write_str("green"),
            HighlightColor::Blue => f.write_str("blue"),
            HighlightColor::Pink => f.write_str("pink"),
            HighlightColor::Orange => f.write_str("orange"),
            HighlightColor::Custom(value) => f.write_str(value),
        }
    }
}

impl FromStr for HighlightColor {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let color = match value.to_ascii_lowercase().as_str() {
            "yellow" => HighlightColor::Yellow,
            "green" => HighlightColor::Green,
            "blue" => HighlightColor::Blue,
            "pink" => HighlightColor::Pink,
            "orange" => HighlightColor::Orange,
            hex if is_hex_color(hex) => HighlightColor::Custom(hex.to_string()),
            _ => {
                return Err(EngineError::Config(format!(
                    "unknown highlight color {value:?}"
                )))
            }
        };
        Ok(color)
    }
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|ch| ch.is_ascii_hexdigit())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HighlightLocation {
    Page { page: usize, bounds: DocumentRect },
    Flow { range: FlowRange },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: HighlightId,
    pub location: HighlightLocation,
    pub text: String,
    pub color: HighlightColor,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Highlight {
    pub fn page(&self) -> Option<usize> {
        match &self.location {
            HighlightLocation::Page { page, .. } => Some(*page),
            HighlightLocation::Flow { .. } => None,
        }
    }

    /// Where to draw the highlight at `scale`; `None` for flow highlights,
    /// which the flow engine draws itself.
    pub fn viewport_rect(&self, scale: f32) -> Option<Rect> {
        match &self.location {
            HighlightLocation::Page { bounds, .. } => Some(bounds.to_viewport(scale)),
            HighlightLocation::Flow { .. } => None,
        }
    }
}

/// A live selection reported by the display layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Rectangle drawn over a page, in viewport pixels at `scale`.
    Page {
        page: usize,
        rect: Rect,
        scale: f32,
        text: String,
    },
    /// Selection endpoints inside a reflowable document.
    Flow {
        anchor: FlowPosition,
        focus: FlowPosition,
        text: Option<String>,
    },
}

/// Storage collaborator that highlights are handed to once created.
pub trait HighlightSink: Send + Sync {
    fn store(&self, document: &DocumentInfo, highlight: &Highlight) -> Result<()>;
    /// Returns whether a stored highlight was removed.
    fn remove(&self, document: &DocumentInfo, id: HighlightId) -> Result<bool>;
    fn load(&self, document: &DocumentInfo) -> Result<Vec<Highlight>>;
}

#[derive(Default)]
pub struct MemoryHighlightSink {
    inner: Mutex<HashMap<DocumentId, Vec<Highlight>>>,
}

impl MemoryHighlightSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HighlightSink for MemoryHighlightSink {
    fn store(&self, document: &DocumentInfo, highlight: &Highlight) -> Result<()> {
        let mut inner = self.inner.lock();
        let stored = inner.entry(document.id).or_default();
        stored.retain(|existing| existing.id != highlight.id);
        stored.push(highlight.clone());
        Ok(())
    }

    fn remove(&self, document: &DocumentInfo, id: HighlightId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(stored) = inner.get_mut(&document.id) else {
            return Ok(false);
        };
        let before = stored.len();
        stored.retain(|existing| existing.id != id);
        Ok(stored.len() != before)
    }

    fn load(&self, document: &DocumentInfo) -> Result<Vec<Highlight>> {
        Ok(self.inner.lock().get(&document.id).cloned().unwrap_or_default())
    }
}

/// The session-owned set of highlights for one document.
#[derive(Debug, Clone, Default)]
pub struct AnnotationManager {
    highlights: Vec<Highlight>,
    default_color: HighlightColor,
}

impl AnnotationManager {
    pub fn new(default_color: HighlightColor) -> Self {
        Self {
            highlights: Vec::new(),
            default_color,
        }
    }

    /// Replaces the current set, e.g. with highlights loaded from storage.
    pub fn restore(&mut self, highlights: Vec<Highlight>) {
        self.highlights = highlights;
        self.sort();
    }

    pub fn add_highlight(
        &mut self,
        document: &Document,
        selection: &Selection,
    ) -> EngineResult<Highlight> {
        let color = self.default_color.clone();
        self.add_highlight_with(document, selection, color, None)
    }

    #[instrument(skip(self, document, selection), fields(document = %source_name(document.info())))]
    pub fn add_highlight_with(
        &mut self,
        document: &Document,
        selection: &Selection,
        color: HighlightColor,
        note: Option<String>,
    ) -> EngineResult<Highlight> {
        let (location, text) = resolve_selection(document, selection)?;
        let highlight = Highlight {
            id: Uuid::new_v4(),
            location,
            text,
            color,
            note: note.filter(|note| !note.trim().is_empty()),
            created_at: Utc::now(),
        };
        debug!(id = %highlight.id, "added highlight");
        self.highlights.push(highlight.clone());
        self.sort();
        Ok(highlight)
    }

    /// Removes a highlight. Unknown ids are ignored.
    pub fn remove_highlight(&mut self, id: HighlightId) -> Option<Highlight> {
        let position = self.highlights.iter().position(|h| h.id == id)?;
        Some(self.highlights.remove(position))
    }

    /// Sets or clears (with blank text) the note of a highlight. Returns
    /// whether the highlight exists.
    pub fn set_note(&mut self, id: HighlightId, note: &str) -> bool {
        match self.highlights.iter_mut().find(|h| h.id == id) {
            Some(highlight) => {
                highlight.note = (!note.trim().is_empty()).then(|| note.to_string());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: HighlightId) -> Option<&Highlight> {
        self.highlights.iter().find(|h| h.id == id)
    }

    /// Highlights in reading order.
    pub fn highlights(&self) -> &[Highlight] {
        &self.highlights
    }

    pub fn highlights_on_page(&self, page: usize) -> impl Iterator<Item = &Highlight> {
        self.highlights
            .iter()
            .filter(move |highlight| highlight.page() == Some(page))
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    fn sort(&mut self) {
        self.highlights.sort_by(|a, b| match (&a.location, &b.location) {
            (
                HighlightLocation::Page { page: pa, bounds: ba },
                HighlightLocation::Page { page: pb, bounds: bb },
            ) => pa.cmp(pb).then_with(|| {
                // higher baseline means nearer the top of the page
                bb.origin
                    .y
                    .partial_cmp(&ba.origin.y)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            (HighlightLocation::Flow { range: ra }, HighlightLocation::Flow { range: rb }) => {
                ra.start.cmp(&rb.start)
            }
            (HighlightLocation::Page { .. }, HighlightLocation::Flow { .. }) => std::cmp::Ordering::Less,
            (HighlightLocation::Flow { .. }, HighlightLocation::Page { .. }) => {
                std::cmp::Ordering::Greater
            }
        });
    }
}

/// Turns a selection into the location a highlight stores, plus its text.
pub fn resolve_selection(
    document: &Document,
    selection: &Selection,
) -> EngineResult<(HighlightLocation, String)> {
    match (document, selection) {
        (
            Document::FixedPage(doc),
            Selection::Page {
                page,
                rect,
                scale,
                text,
            },
        ) => {
            if rect.normalized().is_empty() || text.trim().is_empty() {
                return Err(EngineError::EmptySelection);
            }
            let size = doc.page_size(*page)?;
            let bounds = DocumentRect::from_viewport(*rect, size.height, *scale)
                .ok_or(EngineError::EmptySelection)?;
            Ok((
                HighlightLocation::Page {
                    page: *page,
                    bounds,
                },
                text.trim().to_string(),
            ))
        }
        (Document::Reflowable(doc), Selection::Flow { anchor, focus, text }) => {
            let engine = doc.engine();
            let range = engine
                .selection_range(anchor, focus)
                .map_err(|err| EngineError::InvalidSelection(format!("{err:#}")))?;
            if range.is_collapsed() {
                return Err(EngineError::EmptySelection);
            }
            let text = match text {
                Some(text) => text.clone(),
                None => engine
                    .text_in_range(&range)
                    .map_err(|err| EngineError::InvalidSelection(format!("{err:#}")))?,
            };
            if text.trim().is_empty() {
                return Err(EngineError::EmptySelection);
            }
            Ok((HighlightLocation::Flow { range }, text.trim().to_string()))
        }
        (Document::FixedPage(_), Selection::Flow { .. }) => Err(EngineError::CapabilityMismatch {
            operation: "flow selection",
            document: "fixed-page",
        }),
        (Document::Reflowable(_), Selection::Page { .. }) => Err(EngineError::CapabilityMismatch {
            operation: "page selection",
            document: "reflowable",
        }),
    }
}
