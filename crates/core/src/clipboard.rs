use std::collections::BTreeMap;

use seq_engine::NativeEngine;

use crate::cell::Cell;
use crate::grid::GridStore;
use crate::selection::{GridPos, Scope, SelectionEngine};

/// Copied cells keyed by `(row, column)` offset from the source selection's
/// top-left. Empty cells are not stored, so pasting never erases.
#[derive(Debug, Clone, Default)]
pub struct Clipboard {
    cells: BTreeMap<(usize, usize), Cell>,
}

impl Clipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, row_offset: usize, column_offset: usize) -> Option<&Cell> {
        self.cells.get(&(row_offset, column_offset))
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Replace the contents with the selection. An empty selection leaves the
    /// clipboard untouched. Returns the number of cells captured.
    pub fn copy<E: NativeEngine>(
        &mut self,
        selection: &SelectionEngine,
        grid: &GridStore<E>,
        scope: Scope,
    ) -> usize {
        let Some(origin) = selection.top_left() else {
            return 0;
        };

        self.cells = selection
            .selected()
            .filter_map(|pos| {
                let cell = grid.cell_at(scope.address(pos)).ok()?;
                (!cell.is_empty())
                    .then_some(((pos.row - origin.row, pos.column - origin.column), cell))
            })
            .collect();
        self.cells.len()
    }

    /// Write the contents with the current selection's top-left as origin.
    /// Targets outside the section or layer are dropped. Returns the number of
    /// cells written.
    pub fn paste<E: NativeEngine>(
        &self,
        selection: &SelectionEngine,
        grid: &mut GridStore<E>,
        scope: Scope,
    ) -> usize {
        let Some(origin) = selection.top_left() else {
            return 0;
        };

        let mut written = 0;
        for (&(row, column), &cell) in &self.cells {
            let target = GridPos::new(origin.row + row, origin.column + column);
            let Ok(at) = grid.absolute(scope.address(target)) else {
                continue;
            };
            if grid.put_cell(at.step, at.column, cell).is_ok() {
                written += 1;
            }
        }
        if written < self.cells.len() {
            log::debug!("paste dropped {} cells outside the grid", self.cells.len() - written);
        }
        written
    }
}
