use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use epub::doc::{EpubDoc, NavPoint};
use folio_core::{
    Destination, Document, DocumentFormat, DocumentInfo, DocumentProvider, FlowEngine, FlowMatch,
    FlowPosition, FlowRange, OutlineEntry, ReflowableDocument,
};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, warn};

/// Characters of context kept on either side of a search hit.
const EXCERPT_RADIUS: usize = 40;

static STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(style|script|head)[^>]*>.*?</(style|script|head)>")
        .expect("Failed to compile style regex")
});
static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(p|div|br|h[1-6]|li|tr|section|blockquote)[^>]*>")
        .expect("Failed to compile block tag regex")
});
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("Failed to compile tag regex"));
static SPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Failed to compile whitespace regex"));

/// Plain text of an XHTML content document, whitespace collapsed.
pub fn html_to_text(html: &str) -> String {
    let text = STYLE_RE.replace_all(html, "");
    let text = BLOCK_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&mdash;", "\u{2014}")
        .replace("&amp;", "&");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// One spine item: its package path, markup and extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub href: String,
    pub html: String,
    pub text: String,
}

impl Section {
    pub fn new(href: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            href: href.into(),
            text: html_to_text(&html),
            html,
        }
    }

    fn char_len(&self) -> u32 {
        u32::try_from(self.text.chars().count()).unwrap_or(u32::MAX)
    }

    /// Character offset of the element carrying `id="anchor"`.
    fn anchor_offset(&self, anchor: &str) -> Option<u32> {
        let needle = Regex::new(&format!(r#"\sid\s*=\s*["']{}["']"#, regex::escape(anchor))).ok()?;
        let found = needle.find(&self.html)?;
        let tag_start = self.html[..found.start()].rfind('<')?;
        let before = html_to_text(&self.html[..tag_start]);
        let offset = before.chars().count() as u32;
        Some(offset.min(self.char_len()))
    }
}

/// Flow engine over the spine of an EPUB package.
pub struct EpubFlowEngine {
    info: DocumentInfo,
    sections: Vec<Section>,
    toc: Vec<OutlineEntry>,
}

impl EpubFlowEngine {
    pub fn from_sections(
        info: DocumentInfo,
        sections: Vec<Section>,
        toc: Vec<OutlineEntry>,
    ) -> Self {
        Self { info, sections, toc }
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        let mut doc = EpubDoc::new(path).map_err(|err| anyhow!("failed to open {:?}: {err}", path))?;

        let mut sections = Vec::with_capacity(doc.get_num_chapters());
        for index in 0..doc.get_num_chapters() {
            if !doc.set_current_chapter(index) {
                warn!(index, "skipping unreachable spine item");
                continue;
            }
            let href = doc
                .spine
                .get(index)
                .and_then(|item| doc.resources.get(&item.idref))
                .map(|resource| resource.path.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some((html, _mime)) = doc.get_current_str() else {
                warn!(index, %href, "spine item has no readable content");
                sections.push(Section::new(href, String::new()));
                continue;
            };
            sections.push(Section::new(href, html));
        }
        if sections.is_empty() {
            bail!("{:?} has no readable spine items", path);
        }

        let toc = doc.toc.iter().map(outline_from_nav_point).collect();
        let info = DocumentInfo::new(path.to_path_buf(), DocumentFormat::Epub);
        debug!(sections = sections.len(), "loaded epub");
        Ok(Self::from_sections(info, sections, toc))
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn section_index_for_href(&self, href: &str) -> Option<usize> {
        if href.is_empty() {
            return None;
        }
        self.sections.iter().position(|section| {
            !section.href.is_empty()
                && (section.href == href || section.href.ends_with(href) || href.ends_with(&section.href))
        })
    }

    fn locate(&self, position: &FlowPosition) -> Result<(usize, u32)> {
        let (section, offset) = position
            .section_offset()
            .ok_or_else(|| anyhow!("{position} is not a section position"))?;
        let found = self
            .sections
            .get(section)
            .ok_or_else(|| anyhow!("{position} points past the last section"))?;
        Ok((section, offset.min(found.char_len())))
    }
}

fn outline_from_nav_point(point: &NavPoint) -> OutlineEntry {
    let href = point.content.to_string_lossy().to_string();
    let destination = (!href.is_empty()).then_some(Destination::Href(href));
    OutlineEntry::new(point.label.clone(), destination)
        .with_children(point.children.iter().map(outline_from_nav_point).collect())
}

impl FlowEngine for EpubFlowEngine {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn start(&self) -> FlowPosition {
        FlowPosition::section_start(0)
    }

    fn search(&self, query: &str) -> Result<Vec<FlowMatch>> {
        let needle: Vec<char> = query
            .chars()
            .map(|ch| ch.to_lowercase().next().unwrap_or(ch))
            .collect();
        if needle.iter().all(|ch| ch.is_whitespace()) {
            return Ok(Vec::new());
        }
        let mut hits = Vec::new();
        for (index, section) in self.sections.iter().enumerate() {
            let chars: Vec<char> = section.text.chars().collect();
            let folded: Vec<char> = chars
                .iter()
                .map(|ch| ch.to_lowercase().next().unwrap_or(*ch))
                .collect();
            if folded.len() < needle.len() {
                continue;
            }
            let mut at = 0;
            while at + needle.len() <= folded.len() {
                if folded[at..at + needle.len()] != needle[..] {
                    at += 1;
                    continue;
                }
                let end = at + needle.len();
                let from = at.saturating_sub(EXCERPT_RADIUS);
                let to = (end + EXCERPT_RADIUS).min(chars.len());
                hits.push(FlowMatch {
                    range: FlowRange::new(
                        FlowPosition::in_section(index, at as u32),
                        FlowPosition::in_section(index, end as u32),
                    ),
                    excerpt: chars[from..to].iter().collect(),
                    start: at - from,
                    end: end - from,
                });
                at = end;
            }
        }
        Ok(hits)
    }

    fn outline(&self) -> Result<Vec<OutlineEntry>> {
        Ok(self.toc.clone())
    }

    fn resolve_destination(&self, destination: &Destination) -> Result<FlowPosition> {
        let Destination::Href(href) = destination else {
            bail!("{destination:?} is not a content reference");
        };
        let (path, anchor) = match href.split_once('#') {
            Some((path, anchor)) => (path, Some(anchor)),
            None => (href.as_str(), None),
        };
        let index = self
            .section_index_for_href(path)
            .with_context(|| format!("no spine item matches {href}"))?;
        let offset = anchor
            .and_then(|anchor| self.sections[index].anchor_offset(anchor))
            .unwrap_or(0);
        Ok(FlowPosition::in_section(index, offset))
    }

    fn selection_range(&self, anchor: &FlowPosition, focus: &FlowPosition) -> Result<FlowRange> {
        let (a_section, a_offset) = self.locate(anchor)?;
        let (f_section, f_offset) = self.locate(focus)?;
        Ok(FlowRange::new(
            FlowPosition::in_section(a_section, a_offset),
            FlowPosition::in_section(f_section, f_offset),
        ))
    }

    fn text_in_range(&self, range: &FlowRange) -> Result<String> {
        let (first, start) = self.locate(&range.start)?;
        let (last, end) = self.locate(&range.end)?;
        let mut parts = Vec::new();
        for index in first..=last {
            let chars = self.sections[index].text.chars();
            let from = if index == first { start as usize } else { 0 };
            let part: String = if index == last {
                chars.take(end as usize).skip(from).collect()
            } else {
                chars.skip(from).collect()
            };
            if !part.is_empty() {
                parts.push(part);
            }
        }
        Ok(parts.join(" "))
    }

    fn render_section(&self, range: &FlowRange) -> Result<String> {
        let (section, start) = self.locate(&range.start)?;
        let (end_section, end) = self.locate(&range.end)?;
        let chars: Vec<char> = self.sections[section].text.chars().collect();
        let start = (start as usize).min(chars.len());
        // stored ranges are not guaranteed to be normalized
        let end = if end_section == section {
            (end as usize).clamp(start, chars.len())
        } else {
            chars.len()
        };
        let before: String = chars[..start].iter().collect();
        let marked: String = chars[start..end].iter().collect();
        let after: String = chars[end..].iter().collect();
        Ok(format!("{before}<mark>{marked}</mark>{after}"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EpubProvider;

impl EpubProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentProvider for EpubProvider {
    async fn open(&self, source: &Path) -> Result<Document> {
        let engine = EpubFlowEngine::open(source)?;
        Ok(Document::Reflowable(ReflowableDocument::new(Arc::new(engine))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn engine() -> EpubFlowEngine {
        let sections = vec![
            Section::new(
                "OEBPS/cover.xhtml",
                "<html><head><title>Cover</title><style>p { color: red }</style></head><body><p>Moby-Dick</p></body></html>",
            ),
            Section::new(
                "OEBPS/chapter1.xhtml",
                "<html><body><h1>Loomings</h1><p>Call me Ishmael. Some years ago&mdash;never mind how long precisely.</p><p id=\"whale\">Whenever I find myself growing grim about the mouth, I account it high time to get to sea.</p></body></html>",
            ),
        ];
        let toc = vec![
            OutlineEntry::new("Cover", Some(Destination::Href("OEBPS/cover.xhtml".into()))),
            OutlineEntry::new("Loomings", Some(Destination::Href("chapter1.xhtml".into())))
                .with_children(vec![OutlineEntry::new(
                    "Grim",
                    Some(Destination::Href("chapter1.xhtml#whale".into())),
                )]),
        ];
        EpubFlowEngine::from_sections(
            DocumentInfo::new(PathBuf::from("/books/moby.epub"), DocumentFormat::Epub),
            sections,
            toc,
        )
    }

    #[test]
    fn markup_is_stripped_to_collapsed_text() {
        assert_eq!(
            html_to_text("<p>One &amp; <b>two</b></p>\n\n<p>three</p>"),
            "One & two three"
        );
        assert_eq!(engine().sections()[0].text, "Moby-Dick");
    }

    #[test]
    fn search_reports_every_hit_in_flow_order() {
        let engine = engine();
        let hits = engine.search("I").unwrap();
        assert!(hits.len() > 3);
        for pair in hits.windows(2) {
            assert!(pair[0].range.start < pair[1].range.start);
        }
        let ishmael = engine.search("ishmael").unwrap();
        assert_eq!(ishmael.len(), 1);
        let hit = &ishmael[0];
        let shown: String = hit.excerpt.chars().skip(hit.start).take(hit.end - hit.start).collect();
        assert_eq!(shown, "Ishmael");
        assert!(engine.search("  ").unwrap().is_empty());
    }

    #[test]
    fn hrefs_resolve_to_sections_and_anchors() {
        let engine = engine();
        assert_eq!(
            engine
                .resolve_destination(&Destination::Href("chapter1.xhtml".into()))
                .unwrap(),
            FlowPosition::section_start(1)
        );
        let anchored = engine
            .resolve_destination(&Destination::Href("chapter1.xhtml#whale".into()))
            .unwrap();
        let (section, offset) = anchored.section_offset().unwrap();
        assert_eq!(section, 1);
        let from_anchor: String = engine.sections()[1].text.chars().skip(offset as usize).collect();
        assert!(from_anchor.trim_start().starts_with("Whenever"));
        assert!(engine
            .resolve_destination(&Destination::Href("missing.xhtml".into()))
            .is_err());
        assert!(engine
            .resolve_destination(&Destination::PageIndex(0))
            .is_err());
    }

    #[test]
    fn selections_are_normalized_and_read_back() {
        let engine = engine();
        let text = &engine.sections()[1].text;
        let start = text.find("Ishmael").unwrap() as u32;
        let range = engine
            .selection_range(
                &FlowPosition::in_section(1, start + 7),
                &FlowPosition::in_section(1, start),
            )
            .unwrap();
        assert_eq!(range.start, FlowPosition::in_section(1, start));
        assert_eq!(engine.text_in_range(&range).unwrap(), "Ishmael");
        assert!(engine
            .render_section(&range)
            .unwrap()
            .contains("<mark>Ishmael</mark>"));
        assert!(engine
            .selection_range(&FlowPosition::section_start(9), &FlowPosition::section_start(1))
            .is_err());
    }

    #[test]
    fn reversed_stored_range_renders_without_a_mark() {
        let engine = engine();
        let range = FlowRange {
            start: FlowPosition::in_section(1, 10),
            end: FlowPosition::in_section(1, 5),
        };

        let html = engine.render_section(&range).unwrap();

        assert!(html.contains("<mark></mark>"));
        assert_eq!(html.replace("<mark></mark>", ""), engine.sections()[1].text);
    }

    #[test]
    fn ranges_may_span_sections() {
        let engine = engine();
        let range = FlowRange::new(FlowPosition::in_section(0, 5), FlowPosition::in_section(1, 8));
        assert_eq!(engine.text_in_range(&range).unwrap(), "Dick Loomings");
    }
}
