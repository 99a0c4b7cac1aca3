use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Location;
use crate::error::{EngineError, EngineResult};
use crate::search::{MatchLocation, SearchMatch};
use crate::SearchGeneration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomSettings {
    pub default_scale: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    pub step: f32,
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self {
            default_scale: 1.0,
            min_scale: 0.5,
            max_scale: 2.0,
            step: 0.1,
        }
    }
}

impl ZoomSettings {
    pub fn clamp(&self, scale: f32) -> f32 {
        if !scale.is_finite() {
            return self.default_scale;
        }
        // round to hundredths so repeated steps do not drift
        ((scale * 100.0).round() / 100.0).clamp(self.min_scale, self.max_scale)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchState {
    pub query: String,
    pub matches: Vec<SearchMatch>,
    pub cursor: Option<usize>,
    pub generation: SearchGeneration,
    /// A search has been started and its results are not in yet.
    pub pending: bool,
}

impl SearchState {
    pub fn current(&self) -> Option<&SearchMatch> {
        self.cursor.and_then(|cursor| self.matches.get(cursor))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Panels {
    pub search_open: bool,
    pub toc_open: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationState {
    pub location: Location,
    /// Page count, `None` for an unbounded flow.
    pub extent: Option<usize>,
    pub scale: f32,
    pub search: SearchState,
    pub panels: Panels,
}

/// Compact view of the search state for status lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchSummary {
    pub query: String,
    pub total: usize,
    /// 1-based position of the cursor, as shown to readers ("3 of 12").
    pub position: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTicket {
    pub generation: SearchGeneration,
    pub query: String,
}

#[derive(Debug, Clone)]
pub struct NavigationStateMachine {
    state: NavigationState,
    zoom: ZoomSettings,
}

impl NavigationStateMachine {
    pub fn new(start: Location, extent: Option<usize>, zoom: ZoomSettings) -> Self {
        Self {
            state: NavigationState {
                location: start,
                extent,
                scale: zoom.clamp(zoom.default_scale),
                search: SearchState::default(),
                panels: Panels::default(),
            },
            zoom,
        }
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn location(&self) -> &Location {
        &self.state.location
    }

    pub fn current_page(&self) -> Option<usize> {
        self.state.location.page_number()
    }

    pub fn scale(&self) -> f32 {
        self.state.scale
    }

    /// Moves to page `page`, clamped to `[1, extent]`. Returns the page
    /// actually shown.
    pub fn go_to_page(&mut self, page: usize) -> EngineResult<usize> {
        let total = self.state.extent.ok_or(EngineError::CapabilityMismatch {
            operation: "page navigation",
            document: "reflowable",
        })?;
        let page = page.clamp(1, total.max(1));
        if self.current_page() != Some(page) {
            debug!(page, "navigated");
        }
        self.state.location = Location::page(page);
        Ok(page)
    }

    pub fn next_page(&mut self) -> EngineResult<usize> {
        let current = self.current_page().unwrap_or(1);
        self.go_to_page(current.saturating_add(1))
    }

    pub fn prev_page(&mut self) -> EngineResult<usize> {
        let current = self.current_page().unwrap_or(1);
        self.go_to_page(current.saturating_sub(1))
    }

    /// Jumps to an arbitrary location, e.g. a TOC target or a flow position.
    pub fn go_to(&mut self, location: Location) -> EngineResult<()> {
        match location {
            Location::Page { page } => self.go_to_page(page).map(|_| ()),
            Location::Flow { .. } if self.state.extent.is_some() => {
                Err(EngineError::CapabilityMismatch {
                    operation: "flow navigation",
                    document: "fixed-page",
                })
            }
            location => {
                debug!(%location, "navigated");
                self.state.location = location;
                Ok(())
            }
        }
    }

    /// Starts a new search. Results from every earlier ticket become stale.
    pub fn begin_search(&mut self, query: &str) -> SearchTicket {
        let search = &mut self.state.search;
        search.generation += 1;
        search.query = query.to_string();
        search.matches.clear();
        search.cursor = None;
        search.pending = !query.trim().is_empty();
        SearchTicket {
            generation: search.generation,
            query: search.query.clone(),
        }
    }

    /// Installs the results of `ticket`'s search unless a newer search has
    /// started since.
    pub fn commit_search(
        &mut self,
        ticket: &SearchTicket,
        matches: Vec<SearchMatch>,
    ) -> EngineResult<()> {
        let search = &mut self.state.search;
        if ticket.generation != search.generation {
            let stale = EngineError::StaleSearchDiscarded {
                generation: ticket.generation,
                current: search.generation,
            };
            debug!(error = %stale, query = %ticket.query, "dropping search results");
            return Err(stale);
        }
        search.cursor = (!matches.is_empty()).then_some(0);
        search.matches = matches;
        search.pending = false;
        debug!(
            query = %ticket.query,
            matches = search.matches.len(),
            "search committed"
        );
        Ok(())
    }

    /// Replaces the results in one step, for callers that search inline.
    pub fn run_search(&mut self, query: &str, matches: Vec<SearchMatch>) {
        let ticket = self.begin_search(query);
        // the ticket was just issued, so it cannot be stale
        let _ = self.commit_search(&ticket, matches);
    }

    pub fn next_search_match(&mut self) -> Option<&SearchMatch> {
        let total = self.state.search.matches.len();
        if total == 0 {
            return None;
        }
        let next = match self.state.search.cursor {
            Some(cursor) => (cursor + 1) % total,
            None => 0,
        };
        self.select_match(next)
    }

    pub fn prev_search_match(&mut self) -> Option<&SearchMatch> {
        let total = self.state.search.matches.len();
        if total == 0 {
            return None;
        }
        let prev = match self.state.search.cursor {
            Some(0) | None => total - 1,
            Some(cursor) => cursor - 1,
        };
        self.select_match(prev)
    }

    /// Points the cursor at result `index` and moves to where it was found.
    pub fn select_match(&mut self, index: usize) -> Option<&SearchMatch> {
        let target = match &self.state.search.matches.get(index)?.location {
            MatchLocation::Page { page } => Location::page(*page),
            MatchLocation::Flow { range } => Location::Flow {
                position: range.start.clone(),
            },
        };
        self.state.search.cursor = Some(index);
        self.state.location = match target {
            Location::Page { page } => {
                Location::page(page.clamp(1, self.state.extent.unwrap_or(page).max(1)))
            }
            flow => flow,
        };
        self.state.search.current()
    }

    /// Results on `page`, empty when no search is active.
    pub fn matches_on_page(&self, page: usize) -> impl Iterator<Item = &SearchMatch> {
        let search = &self.state.search;
        let active = !search.query.is_empty() && search.cursor.is_some();
        search
            .matches
            .iter()
            .filter(move |found| active && found.page() == Some(page))
    }

    pub fn search_summary(&self) -> SearchSummary {
        let search = &self.state.search;
        SearchSummary {
            query: search.query.clone(),
            total: search.matches.len(),
            position: search.cursor.map(|cursor| cursor + 1),
        }
    }

    pub fn open_search_panel(&mut self) {
        self.state.panels.search_open = true;
    }

    /// Closing the panel forgets the query and its results.
    pub fn close_search_panel(&mut self) {
        self.state.panels.search_open = false;
        let generation = self.state.search.generation;
        self.state.search = SearchState {
            generation: generation + 1,
            ..SearchState::default()
        };
    }

    pub fn toggle_search_panel(&mut self) {
        if self.state.panels.search_open {
            self.close_search_panel();
        } else {
            self.open_search_panel();
        }
    }

    pub fn toggle_toc_panel(&mut self) {
        self.state.panels.toc_open = !self.state.panels.toc_open;
    }

    /// Navigates to a TOC target and closes the TOC panel.
    pub fn activate_toc(&mut self, target: &Location) -> EngineResult<()> {
        self.go_to(target.clone())?;
        self.state.panels.toc_open = false;
        Ok(())
    }

    pub fn set_scale(&mut self, scale: f32) -> f32 {
        self.state.scale = self.zoom.clamp(scale);
        self.state.scale
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.set_scale(self.state.scale + self.zoom.step)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.set_scale(self.state.scale - self.zoom.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowPosition, FlowRange};

    fn page_match(page: usize) -> SearchMatch {
        SearchMatch {
            location: MatchLocation::Page { page },
            matched: "cat".into(),
            context: "a cat".into(),
            start: 2,
            end: 5,
            bounds: None,
        }
    }

    fn machine(pages: usize) -> NavigationStateMachine {
        NavigationStateMachine::new(Location::page(1), Some(pages), ZoomSettings::default())
    }

    #[test]
    fn go_to_page_clamps_to_document() {
        let mut nav = machine(10);
        assert_eq!(nav.go_to_page(0).unwrap(), 1);
        assert_eq!(nav.go_to_page(4).unwrap(), 4);
        assert_eq!(nav.go_to_page(99).unwrap(), 10);
        assert_eq!(nav.next_page().unwrap(), 10);
        nav.go_to_page(1).unwrap();
        assert_eq!(nav.prev_page().unwrap(), 1);
        assert_eq!(nav.next_page().unwrap(), 2);
    }

    #[test]
    fn page_navigation_needs_a_fixed_page_document() {
        let mut nav = NavigationStateMachine::new(
            Location::Flow {
                position: FlowPosition::section_start(0),
            },
            None,
            ZoomSettings::default(),
        );
        assert!(matches!(
            nav.go_to_page(3),
            Err(EngineError::CapabilityMismatch { .. })
        ));
        nav.go_to(Location::Flow {
            position: FlowPosition::section_start(2),
        })
        .unwrap();
        assert_eq!(
            nav.location(),
            &Location::Flow {
                position: FlowPosition::section_start(2)
            }
        );
    }

    #[test]
    fn only_the_latest_search_is_committed() {
        let mut nav = machine(10);
        let cat = nav.begin_search("cat");
        let dog = nav.begin_search("dog");

        let stale = nav.commit_search(&cat, vec![page_match(2)]);
        assert!(matches!(
            stale,
            Err(EngineError::StaleSearchDiscarded {
                generation: 1,
                current: 2
            })
        ));
        assert!(nav.state().search.matches.is_empty());
        assert!(nav.state().search.pending);

        nav.commit_search(&dog, vec![page_match(7), page_match(9)]).unwrap();
        assert_eq!(nav.state().search.query, "dog");
        assert_eq!(nav.state().search.matches.len(), 2);
        assert_eq!(nav.state().search.cursor, Some(0));
        assert!(!nav.state().search.pending);
    }

    #[test]
    fn match_cursor_wraps_both_ways_and_moves_the_page() {
        let mut nav = machine(10);
        nav.run_search("cat", vec![page_match(2), page_match(5), page_match(8)]);

        assert_eq!(nav.next_search_match().and_then(|m| m.page()), Some(5));
        assert_eq!(nav.next_search_match().and_then(|m| m.page()), Some(8));
        assert_eq!(nav.next_search_match().and_then(|m| m.page()), Some(2));
        assert_eq!(nav.current_page(), Some(2));
        assert_eq!(nav.prev_search_match().and_then(|m| m.page()), Some(8));
        assert_eq!(nav.current_page(), Some(8));
        assert_eq!(
            nav.search_summary(),
            SearchSummary {
                query: "cat".into(),
                total: 3,
                position: Some(3)
            }
        );
    }

    #[test]
    fn empty_results_leave_cursor_unset() {
        let mut nav = machine(3);
        nav.run_search("zebra", Vec::new());
        assert_eq!(nav.state().search.cursor, None);
        assert!(nav.next_search_match().is_none());
        assert!(nav.prev_search_match().is_none());
        assert_eq!(nav.current_page(), Some(1));
    }

    #[test]
    fn flow_matches_move_to_range_start() {
        let mut nav = NavigationStateMachine::new(
            Location::Flow {
                position: FlowPosition::section_start(0),
            },
            None,
            ZoomSettings::default(),
        );
        let range = FlowRange::new(FlowPosition::in_section(3, 10), FlowPosition::in_section(3, 13));
        nav.run_search(
            "cat",
            vec![SearchMatch {
                location: MatchLocation::Flow { range },
                matched: "cat".into(),
                context: "the cat sat".into(),
                start: 4,
                end: 7,
                bounds: None,
            }],
        );
        nav.select_match(0);
        assert_eq!(
            nav.location(),
            &Location::Flow {
                position: FlowPosition::in_section(3, 10)
            }
        );
    }

    #[test]
    fn closing_search_panel_clears_results_but_opening_keeps_them() {
        let mut nav = machine(10);
        nav.open_search_panel();
        nav.run_search("cat", vec![page_match(1)]);
        nav.open_search_panel();
        assert_eq!(nav.state().search.matches.len(), 1);

        let late = SearchTicket {
            generation: nav.state().search.generation,
            query: "cat".into(),
        };
        nav.toggle_search_panel();
        assert!(!nav.state().panels.search_open);
        assert!(nav.state().search.query.is_empty());
        assert!(nav.state().search.matches.is_empty());
        assert!(nav.commit_search(&late, vec![page_match(1)]).is_err());
    }

    #[test]
    fn matches_on_page_requires_an_active_search() {
        let mut nav = machine(10);
        assert_eq!(nav.matches_on_page(1).count(), 0);
        nav.run_search("cat", vec![page_match(1), page_match(1), page_match(4)]);
        assert_eq!(nav.matches_on_page(1).count(), 2);
        assert_eq!(nav.matches_on_page(4).count(), 1);
        nav.close_search_panel();
        assert_eq!(nav.matches_on_page(1).count(), 0);
    }

    #[test]
    fn zoom_is_stepped_and_clamped() {
        let mut nav = machine(1);
        assert_eq!(nav.scale(), 1.0);
        assert_eq!(nav.zoom_in(), 1.1);
        for _ in 0..20 {
            nav.zoom_in();
        }
        assert_eq!(nav.scale(), 2.0);
        assert_eq!(nav.set_scale(0.1), 0.5);
        assert_eq!(nav.zoom_out(), 0.5);
        assert_eq!(nav.set_scale(f32::NAN), 1.0);
    }

    #[test]
    fn activating_toc_entry_navigates_and_closes_panel() {
        let mut nav = machine(30);
        nav.toggle_toc_panel();
        assert!(nav.state().panels.toc_open);
        nav.activate_toc(&Location::page(12)).unwrap();
        assert_eq!(nav.current_page(), Some(12));
        assert!(!nav.state().panels.toc_open);
    }
}
