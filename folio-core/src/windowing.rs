use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSettings {
    pub continuous: bool,
    pub buffer_radius: usize,
    /// Distance from either scroll edge, as a fraction of the container
    /// height, at which more pages get materialized.
    pub edge_load_fraction: f32,
    pub edge_load_pages: usize,
    /// Minimum visible fraction for a page to become current on scroll.
    pub visible_threshold: f32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            continuous: true,
            buffer_radius: 2,
            edge_load_fraction: 0.2,
            edge_load_pages: 2,
            visible_threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WindowState {
    Idle,
    Windowed { first: usize, last: usize },
    SinglePage { page: usize },
}

/// Layout measurement of one materialized page, in the same coordinate space
/// as the container rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub page: usize,
    pub rect: Rect,
}

/// Everything the manager needs to know about a scroll event.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollSnapshot {
    pub container: Rect,
    pub scroll_top: f32,
    pub scroll_height: f32,
    pub pages: Vec<PageRect>,
}

impl ScrollSnapshot {
    fn near_top(&self, fraction: f32) -> bool {
        self.scroll_top <= self.container.height * fraction
    }

    fn near_bottom(&self, fraction: f32) -> bool {
        let remaining = self.scroll_height - (self.scroll_top + self.container.height);
        remaining <= self.container.height * fraction
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowUpdate {
    pub window_changed: bool,
    /// New current page, when the event moved it.
    pub current_page: Option<usize>,
    /// Page whose element should be scrolled into view.
    pub scroll_into_view: Option<usize>,
}

/// Visible fraction of `page` inside `container`, relative to the page's own
/// height.
pub fn visible_fraction(page: &Rect, container: &Rect) -> f32 {
    if page.height <= 0.0 {
        return 0.0;
    }
    (page.vertical_overlap(container) / page.height).clamp(0.0, 1.0)
}

#[derive(Debug, Clone)]
pub struct ViewportWindowManager {
    settings: WindowSettings,
    total_pages: usize,
    current_page: usize,
    pages: BTreeSet<usize>,
}

impl ViewportWindowManager {
    pub fn new(total_pages: usize, settings: WindowSettings) -> Self {
        Self {
            settings,
            total_pages,
            current_page: 1,
            pages: BTreeSet::new(),
        }
    }

    pub fn settings(&self) -> &WindowSettings {
        &self.settings
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    /// Materialized pages, ascending.
    pub fn pages(&self) -> Vec<usize> {
        self.pages.iter().copied().collect()
    }

    pub fn contains(&self, page: usize) -> bool {
        self.pages.contains(&page)
    }

    pub fn state(&self) -> WindowState {
        match (self.pages.first(), self.pages.last()) {
            (Some(&first), Some(&last)) if self.settings.continuous => {
                WindowState::Windowed { first, last }
            }
            (Some(&page), _) => WindowState::SinglePage { page },
            _ => WindowState::Idle,
        }
    }

    /// Centers the window on `target`.
    pub fn navigate(&mut self, target: usize) -> WindowUpdate {
        if self.total_pages == 0 {
            return WindowUpdate::default();
        }
        let target = target.clamp(1, self.total_pages);
        let previous_page = self.current_page;
        self.current_page = target;
        let window_changed = self.replace(self.centered_on(target));
        debug!(target, state = ?self.state(), "navigated viewport window");
        WindowUpdate {
            window_changed,
            current_page: (previous_page != target).then_some(target),
            scroll_into_view: self.settings.continuous.then_some(target),
        }
    }

    pub fn set_continuous(&mut self, continuous: bool) -> WindowUpdate {
        if self.settings.continuous == continuous {
            return WindowUpdate::default();
        }
        self.settings.continuous = continuous;
        if self.pages.is_empty() {
            return WindowUpdate::default();
        }
        let target = self.current_page;
        let window_changed = self.replace(self.centered_on(target));
        WindowUpdate {
            window_changed,
            current_page: None,
            scroll_into_view: continuous.then_some(target),
        }
    }

    /// Picks the most visible page and grows the window near the scroll
    /// edges. Does nothing outside continuous mode.
    pub fn on_scroll(&mut self, snapshot: &ScrollSnapshot) -> WindowUpdate {
        let mut update = WindowUpdate::default();
        if !self.settings.continuous || self.pages.is_empty() {
            return update;
        }

        let mut best: Option<(usize, f32)> = None;
        for measured in snapshot
            .pages
            .iter()
            .filter(|measured| self.pages.contains(&measured.page))
        {
            let fraction = visible_fraction(&measured.rect, &snapshot.container);
            if best.map_or(true, |(_, top)| fraction > top) {
                best = Some((measured.page, fraction));
            }
        }
        if let Some((page, fraction)) = best {
            if fraction > self.settings.visible_threshold && page != self.current_page {
                self.current_page = page;
                update.current_page = Some(page);
            }
        }

        let mut next = self.pages.clone();
        let fraction = self.settings.edge_load_fraction;
        let grow = self.settings.edge_load_pages;
        if let Some(&first) = next.first() {
            if snapshot.near_top(fraction) && first > 1 {
                let from = first.saturating_sub(grow).max(1);
                next.extend(from..first);
            }
        }
        if let Some(&last) = next.last() {
            if snapshot.near_bottom(fraction) && last < self.total_pages {
                let to = (last + grow).min(self.total_pages);
                next.extend(last + 1..=to);
            }
        }
        update.window_changed = self.replace(next);
        if update.window_changed {
            debug!(state = ?self.state(), "expanded viewport window");
        }
        update
    }

    fn centered_on(&self, target: usize) -> BTreeSet<usize> {
        if !self.settings.continuous {
            return BTreeSet::from([target]);
        }
        let first = target.saturating_sub(self.settings.buffer_radius).max(1);
        let last = (target + self.settings.buffer_radius).min(self.total_pages);
        (first..=last).collect()
    }

    fn replace(&mut self, next: BTreeSet<usize>) -> bool {
        let next: BTreeSet<usize> = next
            .into_iter()
            .filter(|page| (1..=self.total_pages).contains(page))
            .collect();
        if next == self.pages {
            return false;
        }
        self.pages = next;
        true
    }
}
