//! Case-insensitive text search with highlight geometry.
//!
//! Fixed-page documents are searched run by run against the [`TextIndex`].
//! Matching is per run: a query that straddles two runs is not found. Within
//! a run only the first occurrence is reported, and its rectangle is sized by
//! interpolating over the run's advance width as if every character were
//! equally wide. Both are known approximations, good enough for drawing a
//! highlight and not meant for text extraction. A hit that covers only
//! part of a character's lower-case expansion is skipped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{source_name, Document, FlowEngine};
use crate::error::{EngineError, EngineResult};
use crate::flow::FlowRange;
use crate::geometry::{DocumentRect, Point, Rect};
use crate::text_index::{TextIndex, TextRun};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchLocation {
    Page { page: usize },
    Flow { range: FlowRange },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub location: MatchLocation,
    /// The matched characters as they appear in the source text.
    pub matched: String,
    /// Full text of the run (or flow excerpt) the match was found in.
    pub context: String,
    /// Character offsets of the match inside `context`, end exclusive.
    pub start: usize,
    pub end: usize,
    /// Document-space rectangle, fixed-page matches only.
    pub bounds: Option<DocumentRect>,
}

impl SearchMatch {
    pub fn page(&self) -> Option<usize> {
        match &self.location {
            MatchLocation::Page { page } => Some(*page),
            MatchLocation::Flow { .. } => None,
        }
    }

    /// Highlight rectangle in viewport pixels at `scale`. Recomputed on every
    /// call, so zoom changes never touch the match itself.
    pub fn viewport_rect(&self, scale: f32) -> Option<Rect> {
        self.bounds.map(|bounds| bounds.to_viewport(scale))
    }

    /// `context` split around the match, for result lists.
    pub fn preview(&self) -> (String, String, String) {
        let chars: Vec<char> = self.context.chars().collect();
        let start = self.start.min(chars.len());
        let end = self.end.clamp(start, chars.len());
        (
            chars[..start].iter().collect(),
            chars[start..end].iter().collect(),
            chars[end..].iter().collect(),
        )
    }
}

/// Searches every page of `index` for `query`.
pub fn search(index: &TextIndex, query: &str) -> Vec<SearchMatch> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let (needle, _) = fold_case(query);

    let mut matches = Vec::new();
    for page in index.pages() {
        for run in &page.runs {
            if let Some(found) = match_run(page.index, page.size.height, run, &needle) {
                matches.push(found);
            }
        }
    }
    debug!(query, matches = matches.len(), "searched text index");
    matches
}

/// Proxies the query to the flow engine of a reflowable document.
pub fn search_flow(engine: &dyn FlowEngine, query: &str) -> EngineResult<Vec<SearchMatch>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let hits = engine
        .search(query)
        .map_err(|err| EngineError::unreadable(source_name(engine.info()), format!("{err:#}")))?;
    let mut matches: Vec<SearchMatch> = hits
        .into_iter()
        .map(|hit| {
            let matched = hit
                .excerpt
                .chars()
                .skip(hit.start)
                .take(hit.end.saturating_sub(hit.start))
                .collect();
            SearchMatch {
                location: MatchLocation::Flow { range: hit.range },
                matched,
                context: hit.excerpt,
                start: hit.start,
                end: hit.end,
                bounds: None,
            }
        })
        .collect();
    matches.sort_by(|a, b| match (&a.location, &b.location) {
        (MatchLocation::Flow { range: a }, MatchLocation::Flow { range: b }) => a.start.cmp(&b.start),
        _ => std::cmp::Ordering::Equal,
    });
    Ok(matches)
}

/// Searches whichever kind of document is loaded. Fixed-page documents need
/// their text index.
pub fn search_document(
    document: &Document,
    index: Option<&TextIndex>,
    query: &str,
) -> EngineResult<Vec<SearchMatch>> {
    match document {
        Document::FixedPage(doc) => match index {
            Some(index) => Ok(search(index, query)),
            None => Ok(search(&doc.extract_text()?, query)),
        },
        Document::Reflowable(doc) => search_flow(doc.engine().as_ref(), query),
    }
}

fn match_run(page: usize, page_height: f32, run: &TextRun, needle: &str) -> Option<SearchMatch> {
    let (haystack, origin) = fold_case(&run.text);
    let folded_len = needle.chars().count();
    // a hit that covers only part of one character's lower-case form
    // (`İ` folds to `i̇`) does not match that character
    let folded_start = haystack.match_indices(needle).find_map(|(byte, _)| {
        let first = haystack[..byte].chars().count();
        let last = first + folded_len;
        let starts_clean = first == 0 || origin[first - 1] != origin[first];
        let ends_clean = last == origin.len() || origin[last] != origin[last - 1];
        (starts_clean && ends_clean).then_some(first)
    })?;
    let start = origin[folded_start];
    let end = origin[folded_start + folded_len - 1] + 1;

    let run_chars = run.text.chars().count();
    let matched: String = run.text.chars().skip(start).take(end - start).collect();

    let bounds = if run_chars == 0 {
        None
    } else {
        let offset_x = run.width * start as f32 / run_chars as f32;
        let width = run.width * (end - start) as f32 / run_chars as f32;
        let origin = run.transform.translation();
        Some(DocumentRect::new(
            Point::new(origin.x + offset_x, origin.y),
            width,
            run.line_height(),
            page_height,
        ))
    };

    Some(SearchMatch {
        location: MatchLocation::Page { page },
        matched,
        context: run.text.clone(),
        start,
        end,
        bounds,
    })
}

/// Lower-cases `text` one character at a time, returning the folded text and,
/// for each folded character, the index of the source character it came from.
fn fold_case(text: &str) -> (String, Vec<usize>) {
    let mut folded = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (index, ch) in text.chars().enumerate() {
        for lower in ch.to_lowercase() {
            folded.push(lower);
            origin.push(index);
        }
    }
    (folded, origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PageSize, Transform};
    use crate::text_index::tests::FakePages;
    use crate::text_index::Page;

    const EPS: f32 = 1e-3;

    fn run(text: &str, x: f32, y: f32, width: f32) -> TextRun {
        TextRun::new(text, Transform::text_at(12.0, x, y), width)
    }

    fn index_of(pages: Vec<(usize, Vec<TextRun>)>) -> TextIndex {
        TextIndex::from_pages(
            pages
                .into_iter()
                .map(|(index, runs)| Page {
                    index,
                    size: PageSize::new(612.0, 792.0),
                    runs,
                    extraction_failed: false,
                })
                .collect(),
        )
    }

    #[test]
    fn finds_case_insensitive_match_at_run_start() {
        let index = index_of(vec![(1, vec![run("The quick brown fox", 72.0, 700.0, 190.0)])]);

        let matches = search(&index, "the");

        assert_eq!(matches.len(), 1);
        let found = &matches[0];
        assert_eq!(found.page(), Some(1));
        assert_eq!((found.start, found.end), (0, 3));
        assert_eq!(found.matched, "The");
    }

    #[test]
    fn blank_queries_return_nothing() {
        let index = index_of(vec![(1, vec![run("anything", 0.0, 0.0, 10.0)])]);
        assert!(search(&index, "").is_empty());
        assert!(search(&index, "   \t").is_empty());
    }

    #[test]
    fn only_the_first_occurrence_per_run_is_reported() {
        let index = index_of(vec![(1, vec![run("abc abc abc", 0.0, 0.0, 110.0)])]);
        let matches = search(&index, "abc");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].start, 0);
    }

    #[test]
    fn matches_split_across_runs_are_not_stitched() {
        let index = index_of(vec![(
            1,
            vec![run("hello wo", 0.0, 0.0, 80.0), run("rld", 80.0, 0.0, 30.0)],
        )]);
        assert!(search(&index, "world").is_empty());
    }

    #[test]
    fn results_follow_page_then_run_order() {
        let index = index_of(vec![
            (2, vec![run("cat on two", 0.0, 0.0, 100.0)]),
            (
                1,
                vec![
                    run("a cat", 0.0, 700.0, 50.0),
                    run("no match", 0.0, 680.0, 80.0),
                    run("CAT again", 0.0, 660.0, 90.0),
                ],
            ),
        ]);

        let first = search(&index, "cat");
        let second = search(&index, "cat");

        let order: Vec<(Option<usize>, String)> = first
            .iter()
            .map(|m| (m.page(), m.context.clone()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Some(1), "a cat".to_string()),
                (Some(1), "CAT again".to_string()),
                (Some(2), "cat on two".to_string()),
            ]
        );
        assert_eq!(first, second);
        for found in &first {
            assert_eq!(found.matched.to_lowercase(), "cat");
        }
    }

    #[test]
    fn geometry_interpolates_over_run_width() {
        // 10 characters over 100 units: each character is 10 wide.
        let index = index_of(vec![(1, vec![run("0123456789", 50.0, 700.0, 100.0)])]);

        let found = &search(&index, "345")[0];
        let bounds = found.bounds.unwrap();
        assert!((bounds.origin.x - 80.0).abs() < EPS);
        assert!((bounds.origin.y - 700.0).abs() < EPS);
        assert!((bounds.width - 30.0).abs() < EPS);
        assert!((bounds.height - 12.0).abs() < EPS);

        let at_one = found.viewport_rect(1.0).unwrap();
        assert!((at_one.x - 80.0).abs() < EPS);
        assert!((at_one.y - (92.0 - 12.0)).abs() < EPS);

        let at_two = found.viewport_rect(2.0).unwrap();
        assert!((at_two.x - 160.0).abs() < EPS);
        assert!((at_two.y - 160.0).abs() < EPS);
        assert!((at_two.width - 60.0).abs() < EPS);
        assert!((at_two.height - 24.0).abs() < EPS);
    }

    #[test]
    fn explicit_run_height_wins_over_font_size() {
        let index = index_of(vec![(
            1,
            vec![run("Heading", 0.0, 500.0, 70.0).with_height(20.0)],
        )]);
        let bounds = search(&index, "head")[0].bounds.unwrap();
        assert!((bounds.height - 20.0).abs() < EPS);
    }

    #[test]
    fn offsets_are_in_characters_not_bytes() {
        let index = index_of(vec![(1, vec![run("café Crème", 0.0, 0.0, 100.0)])]);
        let found = &search(&index, "crème")[0];
        assert_eq!((found.start, found.end), (5, 10));
        assert_eq!(found.matched, "Crème");
        assert_eq!(
            found.preview(),
            ("café ".to_string(), "Crème".to_string(), String::new())
        );
    }

    #[test]
    fn matches_never_split_a_case_expansion() {
        let index = index_of(vec![(1, vec![run("İi", 0.0, 0.0, 20.0)])]);
        let found = &search(&index, "i")[0];
        assert_eq!((found.start, found.end), (1, 2));
        assert_eq!(found.matched, "i");

        let index = index_of(vec![(1, vec![run("İstanbul", 0.0, 0.0, 80.0)])]);
        assert!(search(&index, "i").is_empty());
        let found = &search(&index, "i\u{307}stan")[0];
        assert_eq!(found.matched, "İstan");
        assert_eq!(found.matched.to_lowercase(), "i\u{307}stan");
    }

    #[test]
    fn failed_pages_contribute_no_matches() {
        let source = FakePages::new(2)
            .with_run(1, run("needle", 0.0, 0.0, 60.0))
            .with_run(2, run("needle", 0.0, 0.0, 60.0))
            .with_broken_page(2);
        let index = TextIndex::build(&source, 2).unwrap();

        let matches = search(&index, "needle");

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].page(), Some(1));
    }
}
