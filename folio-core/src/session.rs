use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::annotations::{
    AnnotationManager, Highlight, HighlightColor, HighlightId, HighlightSink, Selection,
};
use crate::config::EngineConfig;
use crate::debounce::SearchDebouncer;
use crate::document::{source_name, Document, DocumentProvider, Location};
use crate::error::{EngineError, EngineResult};
use crate::geometry::Rect;
use crate::navigation::{NavigationState, NavigationStateMachine, SearchTicket};
use crate::search::{search_document, SearchMatch};
use crate::store::{reading_progress, PersistedReaderState, StateStore};
use crate::text_index::TextIndex;
use crate::toc::{resolve_toc, TocTree};
use crate::windowing::{ScrollSnapshot, ViewportWindowManager, WindowUpdate};
use crate::DocumentId;

#[derive(Debug, Clone)]
pub enum Command {
    GoToPage { page: usize },
    NextPage,
    PrevPage,
    GoTo { location: Location },
    RunSearch { query: String },
    NextMatch,
    PrevMatch,
    SelectMatch { index: usize },
    OpenSearch,
    CloseSearch,
    ToggleSearch,
    ToggleToc,
    ResolveToc,
    ActivateToc { target: Location },
    AddHighlight {
        selection: Selection,
        color: Option<HighlightColor>,
        note: Option<String>,
    },
    RemoveHighlight { id: HighlightId },
    SetNote { id: HighlightId, note: String },
    SetScale { scale: f32 },
    ZoomIn,
    ZoomOut,
    SetContinuous { continuous: bool },
    Scroll { snapshot: ScrollSnapshot },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DocumentOpened(DocumentId),
    LocationChanged(Location),
    WindowChanged(Vec<usize>),
    ScrollIntoView(usize),
    SearchUpdated { query: String, matches: usize },
    TocResolved { entries: usize, degraded: usize },
    HighlightAdded(HighlightId),
    HighlightRemoved(HighlightId),
    ScaleChanged(f32),
    RedrawNeeded,
}

/// One open document with all of its reading state.
pub struct ReaderSession {
    config: EngineConfig,
    document: Document,
    text_index: Option<Arc<TextIndex>>,
    toc: TocTree,
    window: Option<ViewportWindowManager>,
    annotations: AnnotationManager,
    navigation: NavigationStateMachine,
    debouncer: SearchDebouncer,
    store: Arc<dyn StateStore>,
    sink: Option<Arc<dyn HighlightSink>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl ReaderSession {
    #[instrument(skip(provider, config, store))]
    pub async fn open_with<P: DocumentProvider + ?Sized>(
        provider: &P,
        path: &Path,
        config: EngineConfig,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let document = provider
            .open(path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self::new(document, config, store)?)
    }

    /// Indexes the document, resolves its outline and restores the last
    /// reading position.
    pub fn new(
        document: Document,
        config: EngineConfig,
        store: Arc<dyn StateStore>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let info = document.info().clone();

        let text_index = match &document {
            Document::FixedPage(doc) => Some(Arc::new(doc.extract_text()?)),
            Document::Reflowable(_) => None,
        };
        let toc = resolve_toc(&document.outline(), &document);
        let window = document
            .extent()
            .map(|pages| ViewportWindowManager::new(pages, config.window_settings()));
        let navigation = NavigationStateMachine::new(
            document.start(),
            document.extent(),
            config.zoom_settings(),
        );

        let mut session = Self {
            annotations: AnnotationManager::new(config.highlight_color.clone()),
            debouncer: SearchDebouncer::new(config.search_debounce),
            config,
            document,
            text_index,
            toc,
            window,
            navigation,
            store,
            sink: None,
            events: Arc::new(Mutex::new(Vec::new())),
        };

        let persisted = match session.store.load(&info) {
            Ok(state) => state,
            Err(err) => {
                warn!(?err, document = %source_name(&info), "ignoring unreadable reading state");
                None
            }
        };
        let fallback = PersistedReaderState {
            scale: session.config.default_scale,
            continuous: session.config.continuous,
            ..PersistedReaderState::default()
        };
        session.restore(persisted.unwrap_or(fallback));
        session.push(SessionEvent::DocumentOpened(info.id));
        info!(
            document = %source_name(&info),
            kind = session.document.kind_name(),
            toc_entries = session.toc.flatten().len(),
            "opened document"
        );
        Ok(session)
    }

    /// Attaches a persistence collaborator and loads the highlights it holds
    /// for this document.
    pub fn with_highlight_sink(mut self, sink: Arc<dyn HighlightSink>) -> Result<Self> {
        let stored = sink
            .load(self.document.info())
            .context("failed to load stored highlights")?;
        self.annotations.restore(stored);
        self.sink = Some(sink);
        Ok(self)
    }

    fn restore(&mut self, state: PersistedReaderState) {
        self.navigation.set_scale(state.scale);
        if let Some(window) = self.window.as_mut() {
            window.set_continuous(state.continuous);
        }
        let target = state.location.unwrap_or_else(|| self.document.start());
        if let Err(err) = self.navigation.go_to(target) {
            debug!(error = %err, "stored location does not fit the document");
        }
        self.sync_window();
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn text_index(&self) -> Option<&TextIndex> {
        self.text_index.as_deref()
    }

    pub fn toc(&self) -> &TocTree {
        &self.toc
    }

    pub fn window(&self) -> Option<&ViewportWindowManager> {
        self.window.as_ref()
    }

    pub fn annotations(&self) -> &AnnotationManager {
        &self.annotations
    }

    pub fn state(&self) -> &NavigationState {
        self.navigation.state()
    }

    pub fn apply(&mut self, command: Command) -> EngineResult<()> {
        match command {
            Command::GoToPage { page } => {
                self.navigation.go_to_page(page)?;
                self.after_move();
            }
            Command::NextPage => {
                self.navigation.next_page()?;
                self.after_move();
            }
            Command::PrevPage => {
                self.navigation.prev_page()?;
                self.after_move();
            }
            Command::GoTo { location } => {
                self.navigation.go_to(location)?;
                self.after_move();
            }
            Command::RunSearch { query } => {
                self.debouncer.cancel();
                let ticket = self.navigation.begin_search(&query);
                let matches = self.search_for(&ticket)?;
                self.commit_search(&ticket, matches)?;
            }
            Command::NextMatch => {
                if self.navigation.next_search_match().is_some() {
                    self.after_move();
                }
            }
            Command::PrevMatch => {
                if self.navigation.prev_search_match().is_some() {
                    self.after_move();
                }
            }
            Command::SelectMatch { index } => {
                if self.navigation.select_match(index).is_some() {
                    self.after_move();
                }
            }
            Command::OpenSearch => self.navigation.open_search_panel(),
            Command::CloseSearch => {
                self.debouncer.cancel();
                self.navigation.close_search_panel();
                self.push(SessionEvent::RedrawNeeded);
            }
            Command::ToggleSearch => {
                let was_open = self.navigation.state().panels.search_open;
                self.navigation.toggle_search_panel();
                if was_open {
                    self.debouncer.cancel();
                    self.push(SessionEvent::RedrawNeeded);
                }
            }
            Command::ToggleToc => self.navigation.toggle_toc_panel(),
            Command::ResolveToc => {
                self.toc = resolve_toc(&self.document.outline(), &self.document);
                self.push(SessionEvent::TocResolved {
                    entries: self.toc.flatten().len(),
                    degraded: self.toc.degraded_count(),
                });
            }
            Command::ActivateToc { target } => {
                self.navigation.activate_toc(&target)?;
                self.after_move();
            }
            Command::AddHighlight {
                selection,
                color,
                note,
            } => {
                let color = color.unwrap_or_else(|| self.config.highlight_color.clone());
                let highlight =
                    self.annotations
                        .add_highlight_with(&self.document, &selection, color, note)?;
                self.hand_off(&highlight);
                self.push(SessionEvent::HighlightAdded(highlight.id));
            }
            Command::RemoveHighlight { id } => {
                if self.annotations.remove_highlight(id).is_some() {
                    self.forget(id);
                    self.push(SessionEvent::HighlightRemoved(id));
                }
            }
            Command::SetNote { id, note } => {
                if self.annotations.set_note(id, &note) {
                    if let Some(highlight) = self.annotations.get(id).cloned() {
                        self.hand_off(&highlight);
                    }
                    self.push(SessionEvent::RedrawNeeded);
                }
            }
            Command::SetScale { scale } => {
                let before = self.navigation.scale();
                self.navigation.set_scale(scale);
                self.after_zoom(before);
            }
            Command::ZoomIn => {
                let before = self.navigation.scale();
                self.navigation.zoom_in();
                self.after_zoom(before);
            }
            Command::ZoomOut => {
                let before = self.navigation.scale();
                self.navigation.zoom_out();
                self.after_zoom(before);
            }
            Command::SetContinuous { continuous } => {
                if let Some(window) = self.window.as_mut() {
                    let update = window.set_continuous(continuous);
                    self.publish_window(update);
                }
            }
            Command::Scroll { snapshot } => {
                if let Some(window) = self.window.as_mut() {
                    let update = window.on_scroll(&snapshot);
                    if let Some(page) = update.current_page {
                        self.navigation.go_to_page(page)?;
                        self.push(SessionEvent::LocationChanged(Location::page(page)));
                    }
                    if update.window_changed {
                        let pages = self.window.as_ref().map(|w| w.pages()).unwrap_or_default();
                        self.push(SessionEvent::WindowChanged(pages));
                    }
                }
            }
        }
        Ok(())
    }

    /// Records a keystroke in the search box. The search runs from
    /// [`ReaderSession::tick`] once typing pauses.
    pub fn search_input(&mut self, query: &str, now: Instant) {
        self.debouncer.input(query, now);
    }

    /// Runs a debounced search if one is due. Returns whether it did.
    pub fn tick(&mut self, now: Instant) -> EngineResult<bool> {
        match self.debouncer.poll(now) {
            Some(query) => {
                self.apply(Command::RunSearch { query })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn begin_search(&mut self, query: &str) -> SearchTicket {
        self.navigation.begin_search(query)
    }

    /// Runs the search for `ticket` without touching session state, so it
    /// can happen off the event loop.
    pub fn search_for(&self, ticket: &SearchTicket) -> EngineResult<Vec<SearchMatch>> {
        search_document(&self.document, self.text_index.as_deref(), &ticket.query)
    }

    /// A handle that can run searches on another task.
    pub fn searcher(&self) -> Searcher {
        Searcher {
            document: self.document.clone(),
            text_index: self.text_index.clone(),
        }
    }

    /// Commits search results. Results for a superseded ticket are dropped
    /// and reported as `Ok(false)`.
    pub fn commit_search(
        &mut self,
        ticket: &SearchTicket,
        matches: Vec<SearchMatch>,
    ) -> EngineResult<bool> {
        match self.navigation.commit_search(ticket, matches) {
            Ok(()) => {
                let search = &self.navigation.state().search;
                let event = SessionEvent::SearchUpdated {
                    query: search.query.clone(),
                    matches: search.matches.len(),
                };
                self.push(event);
                self.push(SessionEvent::RedrawNeeded);
                Ok(true)
            }
            Err(EngineError::StaleSearchDiscarded { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Search highlight rectangles for `page` at the current zoom.
    pub fn search_rects_on_page(&self, page: usize) -> Vec<Rect> {
        let scale = self.navigation.scale();
        self.navigation
            .matches_on_page(page)
            .filter_map(|found| found.viewport_rect(scale))
            .collect()
    }

    /// Stored highlights on `page` at the current zoom.
    pub fn highlight_rects_on_page(&self, page: usize) -> Vec<(HighlightId, Rect)> {
        let scale = self.navigation.scale();
        self.annotations
            .highlights_on_page(page)
            .filter_map(|highlight| highlight.viewport_rect(scale).map(|rect| (highlight.id, rect)))
            .collect()
    }

    pub fn persisted_state(&self) -> PersistedReaderState {
        let location = self.navigation.location().clone();
        let progress = match (location.page_number(), self.document.extent()) {
            (Some(page), Some(total)) => reading_progress(page, total),
            _ => None,
        };
        PersistedReaderState {
            location: Some(location),
            scale: self.navigation.scale(),
            continuous: self
                .window
                .as_ref()
                .map_or(self.config.continuous, |window| window.settings().continuous),
            progress,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn persist(&self) -> Result<()> {
        self.store
            .save(self.document.info(), &self.persisted_state())
            .context("failed to save reading state")
    }

    fn hand_off(&self, highlight: &Highlight) {
        if let Some(sink) = &self.sink {
            if let Err(err) = sink.store(self.document.info(), highlight) {
                warn!(?err, id = %highlight.id, "highlight sink rejected highlight");
            }
        }
    }

    fn forget(&self, id: HighlightId) {
        if let Some(sink) = &self.sink {
            match sink.remove(self.document.info(), id) {
                Ok(true) => {}
                Ok(false) => debug!(%id, "highlight sink had no record to remove"),
                Err(err) => warn!(?err, %id, "highlight sink failed to remove highlight"),
            }
        }
    }

    fn after_move(&mut self) {
        self.push(SessionEvent::LocationChanged(self.navigation.location().clone()));
        self.sync_window();
    }

    fn after_zoom(&mut self, before: f32) {
        let scale = self.navigation.scale();
        if (scale - before).abs() > f32::EPSILON {
            self.push(SessionEvent::ScaleChanged(scale));
            self.push(SessionEvent::RedrawNeeded);
        }
    }

    fn sync_window(&mut self) {
        let Some(page) = self.navigation.current_page() else {
            return;
        };
        if let Some(window) = self.window.as_mut() {
            let update = window.navigate(page);
            self.publish_window(update);
        }
    }

    fn publish_window(&mut self, update: WindowUpdate) {
        if update.window_changed {
            let pages = self.window.as_ref().map(|w| w.pages()).unwrap_or_default();
            self.push(SessionEvent::WindowChanged(pages));
        }
        if let Some(page) = update.scroll_into_view {
            self.push(SessionEvent::ScrollIntoView(page));
        }
    }

    fn push(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

/// Owned search handle detached from the session.
#[derive(Clone)]
pub struct Searcher {
    document: Document,
    text_index: Option<Arc<TextIndex>>,
}

impl Searcher {
    pub fn search(&self, ticket: &SearchTicket) -> EngineResult<Vec<SearchMatch>> {
        search_document(&self.document, self.text_index.as_deref(), &ticket.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::tests::FakeFlow;
    use crate::annotations::MemoryHighlightSink;
    use crate::document::{Destination, FixedPageDocument, OutlineEntry, ReflowableDocument};
    use crate::flow::FlowPosition;
    use crate::geometry::Transform;
    use crate::store::MemoryStateStore;
    use crate::text_index::tests::FakePages;
    use crate::text_index::TextRun;
    use crate::windowing::PageRect;
    use std::time::Duration;

    struct FakeProvider;

    #[async_trait::async_trait]
    impl DocumentProvider for FakeProvider {
        async fn open(&self, path: &Path) -> Result<Document> {
            let mut pages = FakePages::new(10)
                .with_run(2, TextRun::new("The cat sat", Transform::text_at(12.0, 72.0, 700.0), 110.0))
                .with_run(6, TextRun::new("a dog and a cat", Transform::text_at(12.0, 72.0, 500.0), 150.0))
                .with_run(9, TextRun::new("hot dog", Transform::text_at(12.0, 72.0, 300.0), 70.0));
            pages.info.source = path.to_path_buf();
            pages.outline = vec![
                OutlineEntry::new("Start", Some(Destination::PageIndex(0))),
                OutlineEntry::new("Lost", Some(Destination::Named("nowhere".into()))),
                OutlineEntry::new("Middle", Some(Destination::PageIndex(4))),
            ];
            Ok(Document::FixedPage(FixedPageDocument::new(Arc::new(pages))?))
        }
    }

    async fn open(store: Arc<dyn StateStore>) -> ReaderSession {
        ReaderSession::open_with(
            &FakeProvider,
            Path::new("/tmp/example.pdf"),
            EngineConfig::default(),
            store,
        )
        .await
        .unwrap()
    }

    fn drain(session: &ReaderSession) -> Vec<SessionEvent> {
        std::mem::take(&mut *session.events().lock())
    }

    #[tokio::test]
    async fn first_open_follows_configured_mode_and_scale() {
        let config = EngineConfig {
            continuous: false,
            default_scale: 1.5,
            ..EngineConfig::default()
        };
        let session = ReaderSession::open_with(
            &FakeProvider,
            Path::new("/tmp/example.pdf"),
            config,
            Arc::new(MemoryStateStore::new()),
        )
        .await
        .unwrap();

        let window = session.window().unwrap();
        assert!(!window.settings().continuous);
        assert_eq!(window.pages(), vec![1]);
        assert!((session.state().scale - 1.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn opening_resolves_toc_and_centers_window() {
        let session = open(Arc::new(MemoryStateStore::new())).await;

        assert_eq!(session.state().location, Location::page(1));
        assert_eq!(session.window().unwrap().pages(), vec![1, 2, 3]);
        assert_eq!(session.toc().degraded_count(), 1);
        let titles: Vec<&str> = session.toc().flatten().iter().map(|line| line.title).collect();
        assert_eq!(titles, vec!["Start", "Lost", "Middle"]);
        assert!(matches!(
            drain(&session).last(),
            Some(SessionEvent::DocumentOpened(_))
        ));
    }

    #[tokio::test]
    async fn session_navigation_updates_window_and_state() {
        let store = Arc::new(MemoryStateStore::new());
        let mut session = open(store.clone()).await;

        session.apply(Command::GoToPage { page: 5 }).unwrap();
        assert_eq!(session.window().unwrap().pages(), vec![3, 4, 5, 6, 7]);
        session.apply(Command::NextPage).unwrap();
        assert_eq!(session.state().location, Location::page(6));
        session.apply(Command::GoToPage { page: 150 }).unwrap();
        assert_eq!(session.state().location, Location::page(10));
        let events = drain(&session);
        assert!(events.contains(&SessionEvent::ScrollIntoView(10)));
        assert!(events.contains(&SessionEvent::WindowChanged(vec![8, 9, 10])));

        session.apply(Command::ZoomIn).unwrap();
        session.persist().unwrap();
        let stored = store.load(session.document().info()).unwrap().unwrap();
        assert_eq!(stored.location, Some(Location::page(10)));
        assert_eq!(stored.scale, 1.1);
        assert_eq!(stored.progress, Some(1.0));

        let reopened = open(store).await;
        assert_eq!(reopened.state().location, Location::page(10));
        assert_eq!(reopened.state().scale, 1.1);
    }

    #[tokio::test]
    async fn search_walks_matches_across_pages() {
        let mut session = open(Arc::new(MemoryStateStore::new())).await;

        session
            .apply(Command::RunSearch { query: "CAT".into() })
            .unwrap();
        let pages: Vec<Option<usize>> = session.state().search.matches.iter().map(|m| m.page()).collect();
        assert_eq!(pages, vec![Some(2), Some(6)]);
        assert_eq!(session.search_rects_on_page(2).len(), 1);

        session.apply(Command::NextMatch).unwrap();
        assert_eq!(session.state().location, Location::page(6));
        session.apply(Command::NextMatch).unwrap();
        assert_eq!(session.state().location, Location::page(2));

        session.apply(Command::CloseSearch).unwrap();
        assert!(session.state().search.matches.is_empty());
        assert!(session.search_rects_on_page(2).is_empty());
    }

    #[tokio::test]
    async fn superseded_search_results_are_dropped() {
        let mut session = open(Arc::new(MemoryStateStore::new())).await;
        let searcher = session.searcher();

        let cat = session.begin_search("cat");
        let dog = session.begin_search("dog");
        let cat_hits = searcher.search(&cat).unwrap();
        let dog_hits = searcher.search(&dog).unwrap();

        assert!(!session.commit_search(&cat, cat_hits).unwrap());
        assert!(session.commit_search(&dog, dog_hits).unwrap());
        assert_eq!(session.state().search.query, "dog");
        assert!(session
            .state()
            .search
            .matches
            .iter()
            .all(|m| m.matched.to_lowercase() == "dog"));
        assert_eq!(session.state().search.matches.len(), 2);
    }

    #[tokio::test]
    async fn debounced_input_runs_only_the_final_query() {
        let mut session = open(Arc::new(MemoryStateStore::new())).await;
        let start = Instant::now();

        session.search_input("d", start);
        session.search_input("do", start + Duration::from_millis(120));
        session.search_input("dog", start + Duration::from_millis(240));
        assert!(!session.tick(start + Duration::from_millis(300)).unwrap());
        assert!(session.tick(start + Duration::from_millis(540)).unwrap());

        assert_eq!(session.state().search.query, "dog");
        assert_eq!(session.state().search.generation, 1);
    }

    #[tokio::test]
    async fn highlights_flow_to_the_sink() {
        let sink = Arc::new(MemoryHighlightSink::new());
        let mut session = open(Arc::new(MemoryStateStore::new()))
            .await
            .with_highlight_sink(sink.clone())
            .unwrap();
        session.apply(Command::SetScale { scale: 2.0 }).unwrap();

        session
            .apply(Command::AddHighlight {
                selection: Selection::Page {
                    page: 2,
                    rect: Rect::new(144.0, 160.0, 220.0, 24.0),
                    scale: 2.0,
                    text: "The cat sat".into(),
                },
                color: None,
                note: Some("first".into()),
            })
            .unwrap();

        let stored = sink.load(session.document().info()).unwrap();
        assert_eq!(stored.len(), 1);
        let id = stored[0].id;
        let rects = session.highlight_rects_on_page(2);
        assert_eq!(rects.len(), 1);
        assert!((rects[0].1.x - 144.0).abs() < 1e-3);

        session
            .apply(Command::SetNote {
                id,
                note: "second".into(),
            })
            .unwrap();
        assert_eq!(
            sink.load(session.document().info()).unwrap()[0].note.as_deref(),
            Some("second")
        );

        session.apply(Command::RemoveHighlight { id }).unwrap();
        session.apply(Command::RemoveHighlight { id }).unwrap();
        assert!(sink.load(session.document().info()).unwrap().is_empty());
        assert!(session.annotations().is_empty());
    }

    #[tokio::test]
    async fn scrolling_moves_current_page() {
        let mut session = open(Arc::new(MemoryStateStore::new())).await;
        session.apply(Command::GoToPage { page: 5 }).unwrap();
        drain(&session);

        let page_height = 1000.0;
        let pages = session
            .window()
            .unwrap()
            .pages()
            .into_iter()
            .map(|page| PageRect {
                page,
                rect: Rect::new(0.0, (page - 1) as f32 * page_height, 800.0, page_height),
            })
            .collect();
        let snapshot = ScrollSnapshot {
            container: Rect::new(0.0, 5000.0, 800.0, 900.0),
            scroll_top: 5000.0,
            scroll_height: 10.0 * page_height,
            pages,
        };
        session.apply(Command::Scroll { snapshot }).unwrap();

        assert_eq!(session.state().location, Location::page(6));
        assert!(drain(&session).contains(&SessionEvent::LocationChanged(Location::page(6))));
    }

    #[test]
    fn reflowable_sessions_have_no_window() {
        let document = Document::Reflowable(ReflowableDocument::new(Arc::new(FakeFlow::new(&[
            "Call me Ishmael.",
            "Whenever I find myself growing grim about the mouth",
        ]))));
        let mut session =
            ReaderSession::new(document, EngineConfig::default(), Arc::new(MemoryStateStore::new()))
                .unwrap();

        assert!(session.window().is_none());
        assert!(session.text_index().is_none());
        assert_eq!(session.toc().flatten().len(), 2);
        assert!(matches!(
            session.apply(Command::GoToPage { page: 2 }),
            Err(EngineError::CapabilityMismatch { .. })
        ));

        session
            .apply(Command::RunSearch { query: "find".into() })
            .unwrap();
        session.apply(Command::SelectMatch { index: 0 }).unwrap();
        assert_eq!(
            session.state().location,
            Location::Flow {
                position: FlowPosition::in_section(1, 11)
            }
        );
        let toc_target = session.toc().nodes[1].target.clone();
        session
            .apply(Command::ActivateToc { target: toc_target })
            .unwrap();
        assert_eq!(
            session.state().location,
            Location::Flow {
                position: FlowPosition::section_start(1)
            }
        );
    }
}
