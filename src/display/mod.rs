//! Adaptive display state.
//!
//! The layout is picked once from the shape of the registry:
//!
//! - one target without regions: a single detail pane,
//! - several local targets: a flat list,
//! - any regional target: a two-level tree of targets and regions.
//!
//! [`DisplayState`] owns the selection, search text and collapsed groups, and
//! projects them onto a list of [`VisibleRow`]s. Selection is tracked by row
//! index into that projection and resolved to a [`TargetKey`] through an
//! index table built alongside it. It is only mutated by the render loop.

pub mod app;
pub mod ui;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::events::Event;
use crate::registry::{Registry, TargetKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    SinglePane,
    FlatList,
    TreeView,
}

impl DisplayMode {
    pub fn for_registry(registry: &Registry) -> Self {
        if registry.has_regions() {
            DisplayMode::TreeView
        } else if registry.target_names().len() == 1 {
            DisplayMode::SinglePane
        } else {
            DisplayMode::FlatList
        }
    }
}

/// Health shown next to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Up,
    Down,
}

/// Stable identity of a row across projections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowId {
    Stream(TargetKey),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    /// A target with exactly one stream.
    Target,
    /// Parent row of a target's regions.
    Group { collapsed: bool, children: usize },
    /// A region under its group.
    Region,
    /// Flattened "target → region" row while searching the tree.
    SearchResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibleRow {
    pub id: RowId,
    pub kind: RowKind,
    pub label: String,
    pub depth: u8,
    pub status: RowStatus,
}

#[derive(Debug)]
pub struct DisplayState {
    mode: DisplayMode,
    registry: Arc<Registry>,
    selected: usize,
    search: String,
    collapsed: HashSet<String>,
    statuses: HashMap<TargetKey, bool>,
    rows: Vec<VisibleRow>,
    // row index -> owning stream
    row_keys: Vec<TargetKey>,
}

impl DisplayState {
    pub fn new(registry: Arc<Registry>) -> Self {
        let mode = DisplayMode::for_registry(&registry);
        let mut state = Self {
            mode,
            registry,
            selected: 0,
            search: String::new(),
            collapsed: HashSet::new(),
            statuses: HashMap::new(),
            rows: Vec::new(),
            row_keys: Vec::new(),
        };
        state.rebuild(None, None);
        state
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn rows(&self) -> &[VisibleRow] {
        &self.rows
    }

    pub fn search_text(&self) -> &str {
        &self.search
    }

    pub fn is_collapsed(&self, target_name: &str) -> bool {
        self.collapsed.contains(target_name)
    }

    /// Projected index of the selection, `None` when nothing is visible.
    pub fn selected_index(&self) -> Option<usize> {
        (self.selected < self.rows.len()).then_some(self.selected)
    }

    pub fn selected_row(&self) -> Option<&VisibleRow> {
        self.selected_index().map(|i| &self.rows[i])
    }

    /// Stream backing the selected row. A group row resolves to its first region.
    pub fn selected_key(&self) -> Option<&TargetKey> {
        self.selected_index().map(|i| &self.row_keys[i])
    }

    // --- Navigation ---

    pub fn next(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        self.selected = (self.selected + 1) % self.rows.len();
    }

    pub fn previous(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        self.selected = (self.selected + self.rows.len() - 1) % self.rows.len();
    }

    pub fn select_first(&mut self) {
        self.selected = 0;
    }

    pub fn select_last(&mut self) {
        self.selected = self.rows.len().saturating_sub(1);
    }

    // --- Search ---

    /// Replace the search text. The single pane has nothing to filter.
    pub fn set_search(&mut self, text: &str) {
        if self.mode == DisplayMode::SinglePane || self.search == text {
            return;
        }
        self.search = text.to_string();
        self.refresh();
    }

    pub fn push_search_char(&mut self, c: char) {
        let mut text = self.search.clone();
        text.push(c);
        self.set_search(&text);
    }

    pub fn pop_search_char(&mut self) {
        let mut text = self.search.clone();
        text.pop();
        self.set_search(&text);
    }

    pub fn clear_search(&mut self) {
        self.set_search("");
    }

    // --- Tree groups ---

    /// Expand or collapse a target's regions. Only meaningful in the tree view.
    pub fn toggle_collapse(&mut self, target_name: &str) {
        if self.mode != DisplayMode::TreeView || self.registry.keys_for_target(target_name).len() < 2 {
            return;
        }
        if !self.collapsed.remove(target_name) {
            self.collapsed.insert(target_name.to_string());
        }
        // Keep the cursor on the group that was toggled.
        self.rebuild(Some(RowId::Group(target_name.to_string())), None);
    }

    /// Toggle the group the selection belongs to.
    pub fn toggle_selected_group(&mut self) {
        if !self.search.is_empty() {
            return;
        }
        let target = match self.selected_row() {
            Some(VisibleRow {
                id: RowId::Group(name), ..
            }) => name.clone(),
            Some(VisibleRow {
                kind: RowKind::Region,
                ..
            }) => match self.selected_key() {
                Some(key) => key.target_name().to_string(),
                None => return,
            },
            _ => return,
        };
        self.toggle_collapse(&target);
    }

    // --- Data ---

    /// Record the latest outcome of a stream.
    pub fn on_target_data(&mut self, key: &TargetKey, success: bool) {
        if self.statuses.get(key) == Some(&success) {
            return;
        }
        self.statuses.insert(key.clone(), success);
        self.refresh();
    }

    pub fn apply_event(&mut self, event: &Event) {
        if let Event::TargetDataUpdated { key, data, .. } = event {
            if data.matches(key) {
                self.on_target_data(key, data.result.success);
            }
        }
    }

    pub fn status_of(&self, key: &TargetKey) -> RowStatus {
        match self.statuses.get(key) {
            Some(true) => RowStatus::Up,
            Some(false) => RowStatus::Down,
            None => RowStatus::Pending,
        }
    }

    /// Recompute the projection, keeping the selected row when it is still visible.
    ///
    /// A row that disappeared still keeps the selection when another visible row
    /// resolves to the same stream, such as a group row turning into search results.
    pub fn refresh(&mut self) {
        let anchor = self.selected_row().map(|row| row.id.clone());
        let fallback = self.selected_key().cloned();
        self.rebuild(anchor, fallback);
    }

    fn rebuild(&mut self, anchor: Option<RowId>, fallback: Option<TargetKey>) {
        let (rows, row_keys) = match self.mode {
            DisplayMode::SinglePane => self.project_single(),
            DisplayMode::FlatList => self.project_flat(),
            DisplayMode::TreeView if self.search.is_empty() => self.project_tree(),
            DisplayMode::TreeView => self.project_search_results(),
        };
        self.rows = rows;
        self.row_keys = row_keys;

        self.selected = anchor
            .and_then(|id| self.rows.iter().position(|row| row.id == id))
            .or_else(|| fallback.and_then(|key| self.row_keys.iter().position(|k| *k == key)))
            .unwrap_or(0);
    }

    fn project_single(&self) -> (Vec<VisibleRow>, Vec<TargetKey>) {
        let mut projection = Projection::default();
        if let Some(key) = self.registry.all_keys().into_iter().next() {
            projection.push(self.stream_row(&key, RowKind::Target, key.target_name(), 0), key);
        }
        projection.finish()
    }

    fn project_flat(&self) -> (Vec<VisibleRow>, Vec<TargetKey>) {
        let needle = self.search.to_lowercase();
        let mut projection = Projection::default();
        for key in self.registry.all_keys() {
            if contains_ignore_case(key.target_name(), &needle) {
                projection.push(self.stream_row(&key, RowKind::Target, key.target_name(), 0), key);
            }
        }
        projection.finish()
    }

    fn project_tree(&self) -> (Vec<VisibleRow>, Vec<TargetKey>) {
        let mut projection = Projection::default();

        for name in self.registry.target_names() {
            let keys = self.registry.keys_for_target(name);
            let Some(first) = keys.first().cloned() else {
                continue;
            };

            if keys.len() == 1 {
                let label = first.to_string();
                projection.push(self.stream_row(&first, RowKind::Target, &label, 0), first);
                continue;
            }

            let collapsed = self.collapsed.contains(name);
            let group = VisibleRow {
                id: RowId::Group(name.clone()),
                kind: RowKind::Group {
                    collapsed,
                    children: keys.len(),
                },
                label: name.clone(),
                depth: 0,
                status: aggregate_status(keys.iter().map(|k| self.status_of(k))),
            };
            projection.push(group, first);

            if collapsed {
                continue;
            }
            for key in keys {
                let row = self.stream_row(&key, RowKind::Region, key.region(), 1);
                projection.push(row, key);
            }
        }

        projection.finish()
    }

    fn project_search_results(&self) -> (Vec<VisibleRow>, Vec<TargetKey>) {
        let needle = self.search.to_lowercase();
        let mut projection = Projection::default();

        for key in self.registry.all_keys() {
            let matches = contains_ignore_case(key.target_name(), &needle)
                || (!key.is_local() && contains_ignore_case(key.region(), &needle));
            if matches {
                let label = key.to_string();
                projection.push(self.stream_row(&key, RowKind::SearchResult, &label, 0), key);
            }
        }

        projection.finish()
    }

    fn stream_row(&self, key: &TargetKey, kind: RowKind, label: &str, depth: u8) -> VisibleRow {
        VisibleRow {
            id: RowId::Stream(key.clone()),
            kind,
            label: label.to_string(),
            depth,
            status: self.status_of(key),
        }
    }
}

/// Rows and their index table, built in lockstep.
#[derive(Default)]
struct Projection {
    rows: Vec<VisibleRow>,
    keys: Vec<TargetKey>,
}

impl Projection {
    fn push(&mut self, row: VisibleRow, key: TargetKey) {
        self.rows.push(row);
        self.keys.push(key);
    }

    fn finish(self) -> (Vec<VisibleRow>, Vec<TargetKey>) {
        (self.rows, self.keys)
    }
}

fn aggregate_status(children: impl Iterator<Item = RowStatus>) -> RowStatus {
    let mut all_up = true;
    for status in children {
        match status {
            RowStatus::Down => return RowStatus::Down,
            RowStatus::Pending => all_up = false,
            RowStatus::Up => {}
        }
    }
    if all_up {
        RowStatus::Up
    } else {
        RowStatus::Pending
    }
}

fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    needle_lower.is_empty() || haystack.to_lowercase().contains(needle_lower)
}
