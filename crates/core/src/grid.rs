use std::ops::Range;

use seq_engine::NativeEngine;
use seq_transport::{
    MAX_COLUMNS, MAX_SAMPLE_SLOTS, MAX_SECTION_LOOPS, MAX_SECTIONS, MAX_STEPS, SectionSpan,
};

use crate::address::{AbsoluteAddress, CellAddress, Topology};
use crate::bridge::NativeSyncBridge;
use crate::cell::{Cell, Override};
use crate::error::{Error, Result};

pub const MIN_SECTION_STEPS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub steps: usize,
    pub label: String,
    /// Times song mode plays the section before moving on.
    pub loops: u32,
}

impl Section {
    pub fn new(steps: usize, label: impl Into<String>) -> Self {
        Self {
            steps,
            label: label.into(),
            loops: 1,
        }
    }
}

/// Cells of one layer, flattened as `step * columns_per_layer + column`.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub label: String,
    pub cells: Vec<Cell>,
}

/// Everything the grid owns, as a plain value. Undo history and restore
/// work on whole copies of this.
#[derive(Debug, Clone, PartialEq)]
pub struct GridState {
    pub columns_per_layer: usize,
    pub layers: Vec<Layer>,
    pub sections: Vec<Section>,
    /// Front to back.
    pub layer_order: Vec<usize>,
    pub active_layer: usize,
    pub active_section: usize,
}

pub(crate) fn section_label(index: usize) -> String {
    format!("Section {}", index + 1)
}

pub(crate) fn layer_label(index: usize) -> String {
    format!("Layer {}", index + 1)
}

impl GridState {
    /// An empty grid of `sections` sections of `section_steps` steps each.
    pub fn empty(
        columns_per_layer: usize,
        layer_count: usize,
        section_steps: usize,
        sections: usize,
    ) -> Self {
        let sections: Vec<Section> = (0..sections.max(1))
            .map(|index| Section::new(section_steps, section_label(index)))
            .collect();
        let total_steps: usize = sections.iter().map(|section| section.steps).sum();
        let layer_count = layer_count.max(1);

        Self {
            columns_per_layer,
            layers: (0..layer_count)
                .map(|index| Layer {
                    label: layer_label(index),
                    cells: vec![Cell::EMPTY; total_steps * columns_per_layer],
                })
                .collect(),
            sections,
            layer_order: (0..layer_count).collect(),
            active_layer: 0,
            active_section: 0,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.sections.iter().map(|section| section.steps).sum()
    }

    pub fn total_columns(&self) -> usize {
        self.columns_per_layer * self.layers.len()
    }

    pub fn topology(&self) -> Topology {
        Topology::new(
            self.columns_per_layer,
            self.layers.len(),
            self.sections.iter().map(|section| section.steps).collect(),
        )
    }

    pub fn validate(&self) -> Result<()> {
        check_dimensions(self.columns_per_layer, self.layers.len(), 0)?;
        check_sections(&self.sections)?;

        let cells_per_layer = self.total_steps() * self.columns_per_layer;
        if self
            .layers
            .iter()
            .any(|layer| layer.cells.len() != cells_per_layer)
        {
            return Err(Error::StructuralLimit("layer size does not match sections"));
        }
        if self
            .layers
            .iter()
            .flat_map(|layer| &layer.cells)
            .any(|cell| cell.sample_slot.is_some_and(|slot| slot >= MAX_SAMPLE_SLOTS))
        {
            return Err(Error::StructuralLimit("cell refers to a nonexistent slot"));
        }

        let mut order = self.layer_order.clone();
        order.sort_unstable();
        if !order.iter().copied().eq(0..self.layers.len()) {
            return Err(Error::StructuralLimit("layer order is not a permutation"));
        }
        if self.active_layer >= self.layers.len() || self.active_section >= self.sections.len() {
            return Err(Error::StructuralLimit("active layer or section out of range"));
        }
        Ok(())
    }
}

/// Size checks for grids read from outside, done before anything is allocated.
pub(crate) fn check_dimensions(
    columns_per_layer: usize,
    layer_count: usize,
    total_steps: usize,
) -> Result<()> {
    if columns_per_layer == 0 {
        return Err(Error::StructuralLimit("layers need at least one column"));
    }
    if layer_count == 0 {
        return Err(Error::StructuralLimit("at least one layer is required"));
    }
    if columns_per_layer
        .checked_mul(layer_count)
        .is_none_or(|total| total > MAX_COLUMNS)
    {
        return Err(Error::StructuralLimit("too many engine columns"));
    }
    if total_steps > MAX_STEPS {
        return Err(Error::StructuralLimit("pattern exceeds the engine step table"));
    }
    Ok(())
}

fn check_sections(sections: &[Section]) -> Result<()> {
    if sections.is_empty() {
        return Err(Error::StructuralLimit("at least one section is required"));
    }
    if sections.len() > MAX_SECTIONS {
        return Err(Error::StructuralLimit("too many sections"));
    }
    if sections
        .iter()
        .any(|section| section.steps < MIN_SECTION_STEPS)
    {
        return Err(Error::StructuralLimit("sections need at least 4 steps"));
    }
    if sections
        .iter()
        .any(|section| !(1..=MAX_SECTION_LOOPS).contains(&section.loops))
    {
        return Err(Error::StructuralLimit("section loop count out of range"));
    }
    if sections
        .iter()
        .try_fold(0usize, |sum, section| sum.checked_add(section.steps))
        .is_none_or(|total| total > MAX_STEPS)
    {
        return Err(Error::StructuralLimit("pattern exceeds the engine step table"));
    }
    Ok(())
}

/// Every cell in absolute-address order: by step, then engine column.
fn cells_in_order(data: &GridState) -> impl Iterator<Item = (AbsoluteAddress, Cell)> + '_ {
    let columns_per_layer = data.columns_per_layer;
    let total_columns = data.total_columns();
    (0..data.total_steps()).flat_map(move |step| {
        (0..total_columns).map(move |column| {
            let layer = &data.layers[column / columns_per_layer];
            let cell = layer.cells[step * columns_per_layer + column % columns_per_layer];
            (AbsoluteAddress { step, column }, cell)
        })
    })
}

/// The canonical cell data. Every mutation is mirrored to the engine before
/// the call returns.
pub struct GridStore<E: NativeEngine> {
    bridge: NativeSyncBridge<E>,
    data: GridState,
}

impl<E: NativeEngine> GridStore<E> {
    pub fn new(bridge: NativeSyncBridge<E>, data: GridState) -> Result<Self> {
        data.validate()?;
        let mut grid = Self { bridge, data };
        grid.full_resync();
        Ok(grid)
    }

    pub fn bridge(&self) -> &NativeSyncBridge<E> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut NativeSyncBridge<E> {
        &mut self.bridge
    }

    pub fn state(&self) -> &GridState {
        &self.data
    }

    /// Current topology. Take a fresh one after every structural edit.
    pub fn topology(&self) -> Topology {
        self.data.topology()
    }

    pub fn columns_per_layer(&self) -> usize {
        self.data.columns_per_layer
    }

    pub fn layer_count(&self) -> usize {
        self.data.layers.len()
    }

    pub fn layers(&self) -> &[Layer] {
        &self.data.layers
    }

    pub fn layer_order(&self) -> &[usize] {
        &self.data.layer_order
    }

    pub fn active_layer(&self) -> usize {
        self.data.active_layer
    }

    pub fn sections(&self) -> &[Section] {
        &self.data.sections
    }

    pub fn active_section(&self) -> usize {
        self.data.active_section
    }

    pub fn total_steps(&self) -> usize {
        self.data.total_steps()
    }

    pub fn total_columns(&self) -> usize {
        self.data.total_columns()
    }

    pub fn section_range(&self, section: usize) -> Option<Range<usize>> {
        let topology = self.topology();
        let start = topology.section_start_step(section)?;
        Some(start..start + topology.section_len(section)?)
    }

    /// Sections in timeline order as the engine walks them in song mode.
    pub fn section_spans(&self) -> Vec<SectionSpan> {
        let mut start = 0;
        self.data
            .sections
            .iter()
            .map(|section| {
                let steps = start..start + section.steps;
                start = steps.end;
                SectionSpan {
                    steps,
                    loops: section.loops,
                }
            })
            .collect()
    }

    /// `(layer, index into that layer's cells)`.
    fn locate(&self, step: usize, column: usize) -> Result<(usize, usize)> {
        if step >= self.total_steps() || column >= self.total_columns() {
            return Err(Error::OutOfBounds { step, column });
        }
        let columns_per_layer = self.data.columns_per_layer;
        Ok((
            column / columns_per_layer,
            step * columns_per_layer + column % columns_per_layer,
        ))
    }

    pub fn absolute(&self, address: CellAddress) -> Result<AbsoluteAddress> {
        self.topology()
            .to_absolute(address)
            .ok_or(Error::AddressOutOfBounds {
                layer: address.layer,
                section: address.section,
                row: address.row,
                column: address.column,
            })
    }

    pub fn get_cell(&self, step: usize, column: usize) -> Result<Cell> {
        let (layer, index) = self.locate(step, column)?;
        Ok(self.data.layers[layer].cells[index])
    }

    pub fn cell_at(&self, address: CellAddress) -> Result<Cell> {
        let at = self.absolute(address)?;
        self.get_cell(at.step, at.column)
    }

    /// Store `cell` as given (empty or not) and mirror it.
    pub fn put_cell(&mut self, step: usize, column: usize, cell: Cell) -> Result<()> {
        if let Some(slot) = cell.sample_slot
            && slot >= MAX_SAMPLE_SLOTS
        {
            return Err(Error::InvalidSlot(slot));
        }
        let (layer, index) = self.locate(step, column)?;
        let cell = if cell.is_empty() { Cell::EMPTY } else { cell };
        self.data.layers[layer].cells[index] = cell;
        self.bridge
            .mirror_cell(AbsoluteAddress { step, column }, &cell);
        Ok(())
    }

    pub fn set_cell(
        &mut self,
        step: usize,
        column: usize,
        sample_slot: usize,
        volume: Override,
        pitch: Override,
    ) -> Result<()> {
        self.put_cell(
            step,
            column,
            Cell {
                sample_slot: Some(sample_slot),
                volume,
                pitch,
            },
        )
    }

    pub fn set_cell_at(
        &mut self,
        address: CellAddress,
        sample_slot: usize,
        volume: Override,
        pitch: Override,
    ) -> Result<()> {
        let at = self.absolute(address)?;
        self.set_cell(at.step, at.column, sample_slot, volume, pitch)
    }

    pub fn clear_cell(&mut self, step: usize, column: usize) -> Result<()> {
        self.put_cell(step, column, Cell::EMPTY)
    }

    /// Returns `false` for an empty cell, which has nothing to override.
    pub fn set_cell_volume(&mut self, step: usize, column: usize, volume: Override) -> Result<bool> {
        let mut cell = self.get_cell(step, column)?;
        if cell.is_empty() {
            return Ok(false);
        }
        cell.volume = volume;
        self.put_cell(step, column, cell)?;
        Ok(true)
    }

    pub fn set_cell_pitch(&mut self, step: usize, column: usize, pitch: Override) -> Result<bool> {
        let mut cell = self.get_cell(step, column)?;
        if cell.is_empty() {
            return Ok(false);
        }
        cell.pitch = pitch;
        self.put_cell(step, column, cell)?;
        Ok(true)
    }

    pub fn clear_all(&mut self) {
        for layer in &mut self.data.layers {
            layer.cells.fill(Cell::EMPTY);
        }
        self.bridge.clear_all_grid_cells();
    }

    pub fn non_empty_cells(&self) -> impl Iterator<Item = (AbsoluteAddress, Cell)> + '_ {
        cells_in_order(&self.data).filter(|(_, cell)| !cell.is_empty())
    }

    pub fn full_resync(&mut self) -> usize {
        let total_columns = self.data.total_columns();
        self.bridge
            .full_resync(total_columns, cells_in_order(&self.data))
    }

    /// Replace the whole grid, e.g. from undo or a saved record.
    pub fn restore(&mut self, data: GridState) -> Result<()> {
        data.validate()?;
        self.data = data;
        self.full_resync();
        Ok(())
    }

    pub fn add_layer(&mut self) -> Result<usize> {
        let columns_per_layer = self.data.columns_per_layer;
        if (self.layer_count() + 1) * columns_per_layer > MAX_COLUMNS {
            return Err(Error::StructuralLimit("too many engine columns"));
        }
        let index = self.layer_count();
        self.data.layers.push(Layer {
            label: layer_label(index),
            cells: vec![Cell::EMPTY; self.total_steps() * columns_per_layer],
        });
        self.data.layer_order.insert(0, index);
        // existing addresses are unchanged, only the column count grows
        self.bridge.configure_columns(self.total_columns());
        log::debug!("added layer {index}");
        Ok(index)
    }

    pub fn remove_layer(&mut self, layer: usize) -> Result<()> {
        if layer >= self.layer_count() {
            return Err(Error::StructuralLimit("no such layer"));
        }
        if self.layer_count() == 1 {
            return Err(Error::StructuralLimit("at least one layer is required"));
        }

        self.data.layers.remove(layer);
        self.data.layer_order.retain(|&index| index != layer);
        for index in &mut self.data.layer_order {
            if *index > layer {
                *index -= 1;
            }
        }
        let active = self.data.active_layer;
        self.data.active_layer = if active > layer {
            active - 1
        } else {
            active.min(self.layer_count() - 1)
        };

        // later layers moved left: every downstream column changed
        self.full_resync();
        log::debug!("removed layer {layer}");
        Ok(())
    }

    pub fn set_active_layer(&mut self, layer: usize) -> Result<()> {
        if layer >= self.layer_count() {
            return Err(Error::StructuralLimit("no such layer"));
        }
        self.data.active_layer = layer;
        Ok(())
    }

    pub fn bring_layer_to_front(&mut self, layer: usize) -> Result<()> {
        if layer >= self.layer_count() {
            return Err(Error::StructuralLimit("no such layer"));
        }
        self.data.layer_order.retain(|&index| index != layer);
        self.data.layer_order.insert(0, layer);
        Ok(())
    }

    pub fn set_layer_label(&mut self, layer: usize, label: impl Into<String>) -> Result<()> {
        let layer = self
            .data
            .layers
            .get_mut(layer)
            .ok_or(Error::StructuralLimit("no such layer"))?;
        layer.label = label.into();
        Ok(())
    }

    pub fn set_active_section(&mut self, section: usize) -> Result<()> {
        if section >= self.data.sections.len() {
            return Err(Error::StructuralLimit("no such section"));
        }
        self.data.active_section = section;
        Ok(())
    }

    pub fn set_section_label(&mut self, section: usize, label: impl Into<String>) -> Result<()> {
        let section = self
            .data
            .sections
            .get_mut(section)
            .ok_or(Error::StructuralLimit("no such section"))?;
        section.label = label.into();
        Ok(())
    }

    /// 1 ..= 16 passes; only song mode uses them.
    pub fn set_section_loops(&mut self, section: usize, loops: u32) -> Result<()> {
        if !(1..=MAX_SECTION_LOOPS).contains(&loops) {
            return Err(Error::StructuralLimit("section loop count out of range"));
        }
        let section = self
            .data
            .sections
            .get_mut(section)
            .ok_or(Error::StructuralLimit("no such section"))?;
        section.loops = loops;
        Ok(())
    }

    fn section_len(&self, section: usize) -> Result<usize> {
        self.data
            .sections
            .get(section)
            .map(|section| section.steps)
            .ok_or(Error::StructuralLimit("no such section"))
    }

    pub fn resize_section(&mut self, section: usize, steps: usize) -> Result<()> {
        self.section_len(section)?;
        let mut sections = self.data.sections.clone();
        sections[section].steps = steps;
        self.rebuild(sections, |new_section, row| Some((new_section, row)))
    }

    /// Insert an empty row before `row`; later rows shift down.
    pub fn insert_step(&mut self, section: usize, row: usize) -> Result<()> {
        let len = self.section_len(section)?;
        if row > len {
            return Err(Error::StructuralLimit("row outside section"));
        }
        let mut sections = self.data.sections.clone();
        sections[section].steps = len + 1;
        self.rebuild(sections, |new_section, r| {
            if new_section != section || r < row {
                Some((new_section, r))
            } else if r == row {
                None
            } else {
                Some((new_section, r - 1))
            }
        })
    }

    pub fn delete_step(&mut self, section: usize, row: usize) -> Result<()> {
        let len = self.section_len(section)?;
        if row >= len {
            return Err(Error::StructuralLimit("row outside section"));
        }
        let mut sections = self.data.sections.clone();
        sections[section].steps = len - 1;
        self.rebuild(sections, |new_section, r| {
            if new_section != section || r < row {
                Some((new_section, r))
            } else {
                Some((new_section, r + 1))
            }
        })
    }

    /// Append a section at the end, optionally copying another one's cells.
    pub fn append_section(&mut self, copy_from: Option<usize>) -> Result<usize> {
        let index = self.data.sections.len();
        let section = match copy_from {
            Some(source) => {
                self.section_len(source)?;
                let source = &self.data.sections[source];
                Section {
                    label: format!("{} copy", source.label),
                    ..source.clone()
                }
            }
            None => Section::new(
                self.data
                    .sections
                    .last()
                    .map_or(MIN_SECTION_STEPS, |section| section.steps),
                section_label(index),
            ),
        };

        let mut sections = self.data.sections.clone();
        sections.push(section);
        self.rebuild(sections, |new_section, row| {
            if new_section < index {
                Some((new_section, row))
            } else {
                copy_from.map(|source| (source, row))
            }
        })?;
        Ok(index)
    }

    pub fn delete_section(&mut self, section: usize) -> Result<()> {
        self.section_len(section)?;
        if self.data.sections.len() == 1 {
            return Err(Error::StructuralLimit("at least one section is required"));
        }
        let mut sections = self.data.sections.clone();
        sections.remove(section);
        self.rebuild(sections, |new_section, row| {
            let old = if new_section < section {
                new_section
            } else {
                new_section + 1
            };
            Some((old, row))
        })
    }

    /// Lay out new sections and pull each new row from `source(section, row)`,
    /// which names the old `(section, row)` to copy or `None` for an empty row.
    fn rebuild<F>(&mut self, sections: Vec<Section>, source: F) -> Result<()>
    where
        F: Fn(usize, usize) -> Option<(usize, usize)>,
    {
        check_sections(&sections)?;

        let old = self.topology();
        let columns_per_layer = self.data.columns_per_layer;
        let total_steps: usize = sections.iter().map(|section| section.steps).sum();

        for layer in &mut self.data.layers {
            let mut cells = vec![Cell::EMPTY; total_steps * columns_per_layer];
            let mut start = 0;
            for (new_section, section) in sections.iter().enumerate() {
                for row in 0..section.steps {
                    let Some((old_section, old_row)) = source(new_section, row) else {
                        continue;
                    };
                    let Some(old_start) = old.section_start_step(old_section) else {
                        continue;
                    };
                    if old_row >= old.section_len(old_section).unwrap_or(0) {
                        continue;
                    }
                    let from = (old_start + old_row) * columns_per_layer;
                    let to = (start + row) * columns_per_layer;
                    cells[to..to + columns_per_layer]
                        .copy_from_slice(&layer.cells[from..from + columns_per_layer]);
                }
                start += section.steps;
            }
            layer.cells = cells;
        }

        self.data.sections = sections;
        self.data.active_section = self
            .data
            .active_section
            .min(self.data.sections.len() - 1);
        self.full_resync();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingEngine};

    fn grid(layers: usize, steps: usize) -> GridStore<RecordingEngine> {
        let mut grid = GridStore::new(
            NativeSyncBridge::new(RecordingEngine::default()),
            GridState::empty(4, layers, steps, 1),
        )
        .expect("grid");
        grid.bridge_mut().engine_mut().take_calls();
        grid
    }

    fn calls(grid: &mut GridStore<RecordingEngine>) -> Vec<Call> {
        grid.bridge_mut().engine_mut().take_calls()
    }

    fn slot_at(grid: &GridStore<RecordingEngine>, step: usize, column: usize) -> Option<usize> {
        grid.get_cell(step, column).expect("cell").sample_slot
    }

    #[test]
    fn test_set_cell_in_second_layer_hits_flattened_column() {
        let mut grid = grid(2, 4);
        grid.set_cell_at(
            CellAddress {
                layer: 1,
                section: 0,
                row: 2,
                column: 1,
            },
            5,
            Override::Inherited,
            Override::Inherited,
        )
        .expect("set");

        assert_eq!(
            calls(&mut grid),
            vec![Call::SetGridCell {
                step: 2,
                column: 5,
                slot: 5
            }]
        );
        assert_eq!(slot_at(&grid, 2, 5), Some(5));
    }

    #[test]
    fn test_out_of_bounds_does_not_mutate() {
        let mut grid = grid(1, 4);
        assert!(matches!(
            grid.get_cell(4, 0),
            Err(Error::OutOfBounds { step: 4, column: 0 })
        ));
        assert!(grid.set_cell(0, 4, 1, Override::Inherited, Override::Inherited).is_err());
        assert!(grid.set_cell(0, 0, MAX_SAMPLE_SLOTS, Override::Inherited, Override::Inherited).is_err());
        assert!(calls(&mut grid).is_empty());
    }

    #[test]
    fn test_address_error_names_layer_and_section() {
        let grid = grid(2, 4);
        let address = CellAddress {
            layer: 1,
            section: 0,
            row: 9,
            column: 2,
        };
        let err = grid.cell_at(address).unwrap_err();
        assert!(matches!(
            err,
            Error::AddressOutOfBounds {
                layer: 1,
                section: 0,
                row: 9,
                column: 2
            }
        ));
        assert_eq!(
            err.to_string(),
            "row 9, column 2 of layer 1 in section 0 is outside the grid"
        );
    }

    #[test]
    fn test_clear_cell_mirrors_clear() {
        let mut grid = grid(1, 4);
        grid.set_cell(1, 1, 0, Override::Explicit(0.5), Override::Inherited)
            .expect("set");
        grid.clear_cell(1, 1).expect("clear");
        let calls = calls(&mut grid);
        assert_eq!(calls.last(), Some(&Call::ClearGridCell { step: 1, column: 1 }));
        assert_eq!(grid.get_cell(1, 1).expect("cell"), Cell::EMPTY);
    }

    #[test]
    fn test_volume_on_empty_cell_is_noop() {
        let mut grid = grid(1, 4);
        assert!(!grid.set_cell_volume(0, 0, Override::Explicit(0.3)).expect("volume"));
        assert!(calls(&mut grid).is_empty());

        grid.set_cell(0, 0, 2, Override::Inherited, Override::Inherited)
            .expect("set");
        assert!(grid.set_cell_volume(0, 0, Override::Explicit(0.3)).expect("volume"));
        assert_eq!(
            grid.get_cell(0, 0).expect("cell").volume,
            Override::Explicit(0.3)
        );
    }

    #[test]
    fn test_remove_layers_down_to_floor() {
        let mut grid = grid(3, 4);
        grid.remove_layer(0).expect("remove");
        grid.remove_layer(0).expect("remove");
        assert_eq!(grid.layer_count(), 1);
        assert!(matches!(grid.remove_layer(0), Err(Error::StructuralLimit(_))));
        assert_eq!(grid.layer_count(), 1);
    }

    #[test]
    fn test_remove_layer_relocates_cells() {
        let mut grid = grid(2, 4);
        grid.set_cell(3, 6, 9, Override::Inherited, Override::Inherited)
            .expect("set");
        calls(&mut grid);

        grid.remove_layer(0).expect("remove");
        assert_eq!(slot_at(&grid, 3, 2), Some(9));
        assert_eq!(grid.layer_order(), &[0]);
        assert_eq!(
            calls(&mut grid),
            vec![
                Call::ClearAll,
                Call::ConfigureColumns(4),
                Call::SetGridCell {
                    step: 3,
                    column: 2,
                    slot: 9
                },
            ]
        );
    }

    #[test]
    fn test_add_layer_respects_column_cap() {
        let mut grid = grid(15, 4);
        assert_eq!(grid.add_layer().expect("add"), 15);
        assert_eq!(calls(&mut grid), vec![Call::ConfigureColumns(64)]);
        assert!(matches!(grid.add_layer(), Err(Error::StructuralLimit(_))));
        assert_eq!(grid.layer_order()[0], 15);
    }

    #[test]
    fn test_shrink_section_to_floor() {
        let mut grid = grid(1, 8);
        grid.resize_section(0, 4).expect("shrink");
        assert_eq!(grid.total_steps(), 4);
        assert!(matches!(
            grid.resize_section(0, 3),
            Err(Error::StructuralLimit(_))
        ));
        assert_eq!(grid.total_steps(), 4);
        assert!(matches!(grid.delete_step(0, 0), Err(Error::StructuralLimit(_))));
    }

    #[test]
    fn test_resize_keeps_later_sections_aligned() {
        let mut grid = GridStore::new(
            NativeSyncBridge::new(RecordingEngine::default()),
            GridState::empty(2, 1, 4, 2),
        )
        .expect("grid");
        grid.set_cell(4, 1, 7, Override::Inherited, Override::Inherited)
            .expect("set");

        grid.resize_section(0, 8).expect("grow");
        assert_eq!(grid.section_range(1), Some(8..12));
        assert_eq!(slot_at(&grid, 8, 1), Some(7));
        assert_eq!(slot_at(&grid, 4, 1), None);
    }

    #[test]
    fn test_insert_and_delete_step_shift_rows() {
        let mut grid = grid(1, 4);
        grid.set_cell(2, 0, 1, Override::Inherited, Override::Inherited)
            .expect("set");

        grid.insert_step(0, 1).expect("insert");
        assert_eq!(grid.total_steps(), 5);
        assert_eq!(slot_at(&grid, 3, 0), Some(1));

        grid.delete_step(0, 0).expect("delete");
        assert_eq!(grid.total_steps(), 4);
        assert_eq!(slot_at(&grid, 2, 0), Some(1));
    }

    #[test]
    fn test_append_section_copies_cells() {
        let mut grid = grid(1, 4);
        grid.set_cell(1, 3, 2, Override::Explicit(0.5), Override::Inherited)
            .expect("set");

        let index = grid.append_section(Some(0)).expect("append");
        assert_eq!(index, 1);
        assert_eq!(grid.sections()[1].label, "Section 1 copy");
        assert_eq!(
            grid.get_cell(5, 3).expect("cell"),
            grid.get_cell(1, 3).expect("cell")
        );

        let blank = grid.append_section(None).expect("append");
        let range = grid.section_range(blank).expect("range");
        assert!(range.clone().all(|step| slot_at(&grid, step, 3).is_none()));
    }

    #[test]
    fn test_section_loops_bounds_and_copy() {
        let mut grid = grid(1, 4);
        assert!(matches!(
            grid.set_section_loops(0, 0),
            Err(Error::StructuralLimit(_))
        ));
        assert!(grid.set_section_loops(0, MAX_SECTION_LOOPS + 1).is_err());
        assert!(grid.set_section_loops(3, 2).is_err());
        grid.set_section_loops(0, 3).expect("loops");

        grid.append_section(Some(0)).expect("copy");
        grid.append_section(None).expect("blank");
        let spans = grid.section_spans();
        assert_eq!(
            spans,
            vec![
                SectionSpan { steps: 0..4, loops: 3 },
                SectionSpan { steps: 4..8, loops: 3 },
                SectionSpan { steps: 8..12, loops: 1 },
            ]
        );
        assert!(calls(&mut grid).iter().all(|call| !matches!(call, Call::Sections(_))));
    }

    #[test]
    fn test_oversized_dimensions_are_rejected() {
        assert!(check_dimensions(usize::MAX / 2, 4, 16).is_err());
        assert!(check_dimensions(4, 1, MAX_STEPS + 1).is_err());
        assert!(check_dimensions(0, 1, 16).is_err());
        assert!(check_dimensions(4, 0, 16).is_err());
        assert!(check_dimensions(4, 16, MAX_STEPS).is_ok());
    }

    #[test]
    fn test_delete_section_keeps_one() {
        let mut grid = grid(1, 4);
        grid.append_section(None).expect("append");
        grid.set_cell(5, 0, 3, Override::Inherited, Override::Inherited)
            .expect("set");
        grid.set_active_section(1).expect("active");

        grid.delete_section(0).expect("delete");
        assert_eq!(slot_at(&grid, 1, 0), Some(3));
        assert_eq!(grid.active_section(), 0);
        assert!(matches!(
            grid.delete_section(0),
            Err(Error::StructuralLimit(_))
        ));
    }

    #[test]
    fn test_step_cap() {
        let mut grid = grid(1, 1024);
        grid.append_section(None).expect("append");
        assert!(matches!(
            grid.append_section(None),
            Err(Error::StructuralLimit(_))
        ));
        assert!(grid.insert_step(0, 0).is_err());
        assert_eq!(grid.total_steps(), MAX_STEPS);
    }

    #[test]
    fn test_restore_rejects_invalid_state() {
        let mut grid = grid(1, 4);
        let mut state = grid.state().clone();
        state.layers[0].cells.pop();
        assert!(grid.restore(state).is_err());
        assert_eq!(grid.state().layers[0].cells.len(), 16);
    }

    #[test]
    fn test_non_empty_cells_in_address_order() {
        let mut grid = grid(2, 4);
        grid.set_cell(3, 0, 1, Override::Inherited, Override::Inherited)
            .expect("set");
        grid.set_cell(0, 7, 2, Override::Inherited, Override::Inherited)
            .expect("set");
        grid.set_cell(0, 1, 3, Override::Inherited, Override::Inherited)
            .expect("set");

        let order: Vec<_> = grid
            .non_empty_cells()
            .map(|(at, _)| (at.step, at.column))
            .collect();
        assert_eq!(order, vec![(0, 1), (0, 7), (3, 0)]);
    }
}
