//! Tap and marquee selection over the active layer and section.
//!
//! Positions are `(row, column)` inside one layer's section. Bulk edits
//! translate them through the grid's current topology and skip anything that
//! no longer exists.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use seq_engine::NativeEngine;

use crate::address::{AbsoluteAddress, CellAddress};
use crate::cell::{Cell, Override};
use crate::error::{Error, Result};
use crate::grid::GridStore;
use crate::timer::Interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPos {
    pub row: usize,
    pub column: usize,
}

impl GridPos {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionState {
    Idle,
    SingleSelected,
    Dragging,
    RectangleSelected,
}

/// Which layer and section selection positions refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub layer: usize,
    pub section: usize,
}

impl Scope {
    pub fn address(&self, pos: GridPos) -> CellAddress {
        CellAddress {
            layer: self.layer,
            section: self.section,
            row: pos.row,
            column: pos.column,
        }
    }
}

/// Scrollable grid area in host pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub row_height: f32,
    pub column_width: f32,
    pub height: f32,
    pub scroll_offset: f32,
    /// Distance from the top or bottom edge that triggers auto-scroll.
    pub edge_margin: f32,
    /// Pixels moved per auto-scroll tick.
    pub scroll_step: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            row_height: 32.0,
            column_width: 64.0,
            height: 512.0,
            scroll_offset: 0.0,
            edge_margin: 40.0,
            scroll_step: 8.0,
        }
    }
}

impl Viewport {
    fn max_scroll(&self, rows: usize) -> f32 {
        (rows as f32 * self.row_height - self.height).max(0.0)
    }

    /// Resolve a pointer position to a cell, or `None` outside the grid.
    pub fn cell_at(&self, x: f32, y: f32, rows: usize, columns: usize) -> Option<GridPos> {
        if x < 0.0 || y < 0.0 || self.row_height <= 0.0 || self.column_width <= 0.0 {
            return None;
        }
        let row = ((y + self.scroll_offset) / self.row_height) as usize;
        let column = (x / self.column_width) as usize;
        (row < rows && column < columns).then_some(GridPos { row, column })
    }

    /// -1 near the top edge, 1 near the bottom, 0 elsewhere.
    fn edge_direction(&self, y: f32) -> i8 {
        if y < self.edge_margin {
            -1
        } else if y > self.height - self.edge_margin {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pointer {
    x: f32,
    y: f32,
    rows: usize,
    columns: usize,
}

pub struct SelectionEngine {
    selected: BTreeSet<GridPos>,
    anchor: Option<GridPos>,
    current: Option<GridPos>,
    dragging: bool,
    selection_mode: bool,
    last_tap: Option<(GridPos, Instant)>,
    double_tap: Duration,
    viewport: Viewport,
    pointer: Option<Pointer>,
    auto_scroll: Interval,
}

impl SelectionEngine {
    pub fn new(double_tap: Duration, auto_scroll: Duration) -> Self {
        Self {
            selected: BTreeSet::new(),
            anchor: None,
            current: None,
            dragging: false,
            selection_mode: false,
            last_tap: None,
            double_tap,
            viewport: Viewport::default(),
            pointer: None,
            auto_scroll: Interval::new(auto_scroll),
        }
    }

    pub fn state(&self) -> SelectionState {
        if self.dragging {
            return SelectionState::Dragging;
        }
        match self.selected.len() {
            0 => SelectionState::Idle,
            1 => SelectionState::SingleSelected,
            _ => SelectionState::RectangleSelected,
        }
    }

    pub fn in_selection_mode(&self) -> bool {
        self.selection_mode
    }

    pub fn is_selected(&self, pos: GridPos) -> bool {
        self.selected.contains(&pos)
    }

    pub fn selected(&self) -> impl Iterator<Item = GridPos> + '_ {
        self.selected.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn anchor(&self) -> Option<GridPos> {
        self.anchor
    }

    pub fn current(&self) -> Option<GridPos> {
        self.current
    }

    /// Smallest row and smallest column of the selection.
    pub fn top_left(&self) -> Option<GridPos> {
        let row = self.selected.iter().map(|pos| pos.row).min()?;
        let column = self.selected.iter().map(|pos| pos.column).min()?;
        Some(GridPos { row, column })
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn is_auto_scrolling(&self) -> bool {
        self.auto_scroll.is_active()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
        self.anchor = None;
        self.current = None;
        self.dragging = false;
        self.pointer = None;
        self.auto_scroll.cancel();
    }

    pub fn exit_selection_mode(&mut self) {
        self.clear();
        self.selection_mode = false;
        self.last_tap = None;
    }

    pub fn tap(&mut self, pos: GridPos, now: Instant) {
        if let Some((last, at)) = self.last_tap
            && last == pos
            && now.saturating_duration_since(at) <= self.double_tap
        {
            self.exit_selection_mode();
            return;
        }
        self.last_tap = Some((pos, now));

        if self.selected.contains(&pos) || self.selected.len() > 1 {
            self.clear();
            return;
        }

        self.clear();
        self.selected.insert(pos);
        self.anchor = Some(pos);
        self.current = Some(pos);
        self.selection_mode = true;
    }

    pub fn drag_start(&mut self, pos: GridPos) {
        self.selected.clear();
        self.selected.insert(pos);
        self.anchor = Some(pos);
        self.current = Some(pos);
        self.dragging = true;
        self.selection_mode = true;
        self.last_tap = None;
    }

    /// Re-select the inclusive rectangle between the anchor and `pos`.
    pub fn drag_update(&mut self, pos: GridPos) {
        let Some(anchor) = self.anchor else {
            return;
        };
        if !self.dragging {
            return;
        }
        self.current = Some(pos);
        self.selected.clear();
        let rows = anchor.row.min(pos.row)..=anchor.row.max(pos.row);
        let columns = anchor.column.min(pos.column)..=anchor.column.max(pos.column);
        for row in rows {
            for column in columns.clone() {
                self.selected.insert(GridPos { row, column });
            }
        }
    }

    pub fn drag_end(&mut self) {
        self.dragging = false;
        self.pointer = None;
        self.auto_scroll.cancel();
    }

    /// Pointer moved during a drag, in viewport pixels. Arms auto-scroll while
    /// the pointer sits in an edge margin.
    pub fn drag_pointer(&mut self, x: f32, y: f32, now: Instant, rows: usize, columns: usize) {
        if !self.dragging {
            return;
        }
        self.pointer = Some(Pointer {
            x,
            y,
            rows,
            columns,
        });
        if let Some(pos) = self.viewport.cell_at(x, y, rows, columns) {
            self.drag_update(pos);
        }

        if self.viewport.edge_direction(y) == 0 {
            self.auto_scroll.cancel();
        } else if !self.auto_scroll.is_active() {
            self.auto_scroll.start(now);
        }
    }

    /// Advance auto-scroll. Returns `true` when the selection changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.auto_scroll.poll(now) {
            return false;
        }
        let Some(pointer) = self.pointer else {
            self.auto_scroll.cancel();
            return false;
        };

        let direction = self.viewport.edge_direction(pointer.y) as f32;
        let max_scroll = self.viewport.max_scroll(pointer.rows);
        let scrolled = (self.viewport.scroll_offset + direction * self.viewport.scroll_step)
            .clamp(0.0, max_scroll);
        if scrolled == self.viewport.scroll_offset {
            return false;
        }
        self.viewport.scroll_offset = scrolled;

        let before = self.current;
        if let Some(pos) = self
            .viewport
            .cell_at(pointer.x, pointer.y, pointer.rows, pointer.columns)
        {
            self.drag_update(pos);
        }
        self.current != before
    }

    fn targets<E: NativeEngine>(&self, grid: &GridStore<E>, scope: Scope) -> Vec<AbsoluteAddress> {
        self.selected
            .iter()
            .filter_map(|&pos| grid.absolute(scope.address(pos)).ok())
            .collect()
    }

    /// Clears every selected cell. Returns how many held a sample.
    pub fn delete_selected<E: NativeEngine>(&self, grid: &mut GridStore<E>, scope: Scope) -> usize {
        let mut cleared = 0;
        for at in self.targets(grid, scope) {
            if grid.get_cell(at.step, at.column).is_ok_and(|cell| !cell.is_empty())
                && grid.clear_cell(at.step, at.column).is_ok()
            {
                cleared += 1;
            }
        }
        cleared
    }

    /// Puts `slot` with inherited settings into every selected cell.
    pub fn assign_sample<E: NativeEngine>(
        &self,
        grid: &mut GridStore<E>,
        scope: Scope,
        slot: usize,
    ) -> Result<usize> {
        if slot >= seq_transport::MAX_SAMPLE_SLOTS {
            return Err(Error::InvalidSlot(slot));
        }
        let mut written = 0;
        for at in self.targets(grid, scope) {
            if grid.put_cell(at.step, at.column, Cell::with_sample(slot)).is_ok() {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Empty cells are left alone.
    pub fn set_volume<E: NativeEngine>(
        &self,
        grid: &mut GridStore<E>,
        scope: Scope,
        volume: Override,
    ) -> usize {
        self.targets(grid, scope)
            .into_iter()
            .filter(|at| grid.set_cell_volume(at.step, at.column, volume).unwrap_or(false))
            .count()
    }

    pub fn set_pitch<E: NativeEngine>(
        &self,
        grid: &mut GridStore<E>,
        scope: Scope,
        pitch: Override,
    ) -> usize {
        self.targets(grid, scope)
            .into_iter()
            .filter(|at| grid.set_cell_pitch(at.step, at.column, pitch).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::NativeSyncBridge;
    use crate::grid::GridState;
    use crate::testing::{Call, RecordingEngine};

    const MS: Duration = Duration::from_millis(1);

    fn engine() -> SelectionEngine {
        SelectionEngine::new(300 * MS, 12 * MS)
    }

    fn pos(row: usize, column: usize) -> GridPos {
        GridPos::new(row, column)
    }

    fn grid() -> GridStore<RecordingEngine> {
        GridStore::new(
            NativeSyncBridge::new(RecordingEngine::default()),
            GridState::empty(4, 2, 8, 1),
        )
        .expect("grid")
    }

    #[test]
    fn test_tap_selects_single_cell() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.tap(pos(1, 1), t0);
        assert_eq!(selection.state(), SelectionState::SingleSelected);

        selection.tap(pos(2, 3), t0 + 1000 * MS);
        assert!(selection.is_selected(pos(2, 3)));
        assert!(!selection.is_selected(pos(1, 1)));
    }

    #[test]
    fn test_tap_on_selected_cell_clears() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.tap(pos(1, 1), t0);
        selection.tap(pos(1, 1), t0 + 1000 * MS);
        assert_eq!(selection.state(), SelectionState::Idle);
        assert!(selection.in_selection_mode());
    }

    #[test]
    fn test_tap_outside_rectangle_only_clears() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.drag_start(pos(0, 0));
        selection.drag_update(pos(1, 1));
        selection.drag_end();
        assert_eq!(selection.state(), SelectionState::RectangleSelected);

        selection.tap(pos(3, 3), t0);
        assert_eq!(selection.state(), SelectionState::Idle);
        assert!(!selection.is_selected(pos(3, 3)));
    }

    #[test]
    fn test_double_tap_exits_selection_mode() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.tap(pos(2, 2), t0);
        selection.tap(pos(2, 2), t0 + 200 * MS);
        assert_eq!(selection.state(), SelectionState::Idle);
        assert!(!selection.in_selection_mode());
    }

    #[test]
    fn test_slow_second_tap_is_not_double() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.tap(pos(2, 2), t0);
        selection.tap(pos(2, 2), t0 + 301 * MS);
        assert!(selection.in_selection_mode());
    }

    #[test]
    fn test_drag_rectangle_is_recomputed_in_full() {
        let mut selection = engine();
        selection.drag_start(pos(2, 1));
        selection.drag_update(pos(4, 3));
        assert_eq!(selection.len(), 9);

        // shrinking back must drop cells, not accumulate
        selection.drag_update(pos(0, 0));
        let expected: BTreeSet<_> = (0..=2)
            .flat_map(|row| (0..=1).map(move |column| pos(row, column)))
            .collect();
        assert_eq!(selection.selected().collect::<BTreeSet<_>>(), expected);
        assert_eq!(selection.state(), SelectionState::Dragging);

        selection.drag_end();
        assert_eq!(selection.state(), SelectionState::RectangleSelected);
        assert_eq!(selection.top_left(), Some(pos(0, 0)));
    }

    #[test]
    fn test_auto_scroll_moves_pointer_cell() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.set_viewport(Viewport {
            row_height: 10.0,
            column_width: 10.0,
            height: 100.0,
            scroll_offset: 0.0,
            edge_margin: 10.0,
            scroll_step: 10.0,
        });
        selection.drag_start(pos(0, 0));
        selection.drag_pointer(5.0, 95.0, t0, 32, 4);
        assert!(selection.is_auto_scrolling());
        assert_eq!(selection.current(), Some(pos(9, 0)));

        assert!(!selection.tick(t0 + 5 * MS));
        assert!(selection.tick(t0 + 12 * MS));
        assert_eq!(selection.viewport().scroll_offset, 10.0);
        assert_eq!(selection.current(), Some(pos(10, 0)));
        assert_eq!(selection.len(), 11);

        selection.drag_pointer(5.0, 50.0, t0 + 20 * MS, 32, 4);
        assert!(!selection.is_auto_scrolling());
    }

    #[test]
    fn test_auto_scroll_stops_at_top() {
        let t0 = Instant::now();
        let mut selection = engine();
        selection.drag_start(pos(0, 0));
        selection.drag_pointer(5.0, 1.0, t0, 32, 4);
        assert!(!selection.tick(t0 + 12 * MS));
        assert_eq!(selection.viewport().scroll_offset, 0.0);
    }

    #[test]
    fn test_bulk_edits_target_scope() {
        let mut grid = grid();
        let mut selection = engine();
        selection.drag_start(pos(0, 0));
        selection.drag_update(pos(1, 1));
        selection.drag_end();
        let scope = Scope {
            layer: 1,
            section: 0,
        };

        assert_eq!(selection.assign_sample(&mut grid, scope, 3).expect("assign"), 4);
        assert_eq!(grid.get_cell(1, 5).expect("cell").sample_slot, Some(3));
        assert!(grid.get_cell(0, 0).expect("cell").is_empty());

        grid.clear_cell(0, 4).expect("clear");
        assert_eq!(
            selection.set_volume(&mut grid, scope, Override::Explicit(0.25)),
            3
        );
        assert!(grid.get_cell(0, 4).expect("cell").is_empty());

        grid.bridge_mut().engine_mut().take_calls();
        assert_eq!(selection.delete_selected(&mut grid, scope), 3);
        assert_eq!(
            grid.bridge()
                .engine()
                .count(|call| matches!(call, Call::ClearGridCell { .. })),
            3
        );
    }

    #[test]
    fn test_bulk_edit_skips_cells_outside_grid() {
        let mut grid = grid();
        let mut selection = engine();
        selection.drag_start(pos(6, 2));
        selection.drag_update(pos(9, 5));
        selection.drag_end();
        let scope = Scope {
            layer: 0,
            section: 0,
        };
        assert_eq!(selection.assign_sample(&mut grid, scope, 1).expect("assign"), 4);
        assert!(selection.assign_sample(&mut grid, scope, 5000).is_err());
    }
}
