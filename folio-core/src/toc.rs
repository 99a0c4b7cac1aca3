use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::document::{Document, Location, OutlineEntry};
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub title: String,
    pub target: Location,
    /// The native destination could not be resolved and `target` fell back
    /// to the start of the document.
    pub degraded: bool,
    /// Initial disclosure state for the display layer.
    pub expanded: bool,
    pub children: Vec<TocNode>,
}

/// Flattened view of a TOC node, depth-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocLine<'a> {
    pub depth: usize,
    pub title: &'a str,
    pub target: &'a Location,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocTree {
    pub nodes: Vec<TocNode>,
}

impl TocTree {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn flatten(&self) -> Vec<TocLine<'_>> {
        let mut lines = Vec::new();
        for node in &self.nodes {
            flatten_into(node, 0, &mut lines);
        }
        lines
    }

    pub fn degraded_count(&self) -> usize {
        self.flatten().iter().filter(|line| line.degraded).count()
    }

    /// The last entry, in reading order, whose target page is at or before
    /// `page`. Reflowable targets are skipped.
    pub fn entry_for_page(&self, page: usize) -> Option<TocLine<'_>> {
        self.flatten()
            .into_iter()
            .filter(|line| matches!(line.target.page_number(), Some(target) if target <= page))
            .last()
    }
}

fn flatten_into<'a>(node: &'a TocNode, depth: usize, lines: &mut Vec<TocLine<'a>>) {
    lines.push(TocLine {
        depth,
        title: &node.title,
        target: &node.target,
        degraded: node.degraded,
    });
    for child in &node.children {
        flatten_into(child, depth + 1, lines);
    }
}

/// Anything that can turn an outline destination into a location.
pub trait DestinationResolver {
    fn fallback(&self) -> Location;
    fn resolve(&self, entry: &OutlineEntry) -> Result<Location, EngineError>;
}

impl DestinationResolver for Document {
    fn fallback(&self) -> Location {
        self.start()
    }

    fn resolve(&self, entry: &OutlineEntry) -> Result<Location, EngineError> {
        let destination = entry
            .destination
            .as_ref()
            .ok_or_else(|| EngineError::DestinationUnresolved {
                title: entry.title.clone(),
                reason: "entry has no destination".to_string(),
            })?;
        self.resolve_destination(destination)
            .map_err(|err| EngineError::DestinationUnresolved {
                title: entry.title.clone(),
                reason: format!("{err:#}"),
            })
    }
}

/// Resolves a native outline into a TOC tree. An entry whose destination
/// cannot be resolved points at the document start and is marked degraded;
/// its siblings and children are resolved regardless.
pub fn resolve_toc<R: DestinationResolver + ?Sized>(
    outline: &[OutlineEntry],
    resolver: &R,
) -> TocTree {
    TocTree {
        nodes: outline
            .iter()
            .map(|entry| resolve_entry(entry, resolver))
            .collect(),
    }
}

fn resolve_entry<R: DestinationResolver + ?Sized>(entry: &OutlineEntry, resolver: &R) -> TocNode {
    let (target, degraded) = match resolver.resolve(entry) {
        Ok(target) => (target, false),
        Err(err) => {
            warn!(error = %err, "falling back to document start");
            (resolver.fallback(), true)
        }
    };
    TocNode {
        title: entry.title.trim().to_string(),
        target,
        degraded,
        expanded: true,
        children: entry
            .children
            .iter()
            .map(|child| resolve_entry(child, resolver))
            .collect(),
    }
}
