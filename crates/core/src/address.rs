//! Mapping between editor coordinates and the engine's flat step table.
//!
//! A [`Topology`] is a value: take a fresh one from the grid after every
//! structural edit. Addresses computed against an old topology point at the
//! wrong voice.

/// Position as the editor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddress {
    pub layer: usize,
    pub section: usize,
    pub row: usize,
    pub column: usize,
}

/// Position in the engine table. Columns of all layers sit side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsoluteAddress {
    pub step: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    columns_per_layer: usize,
    layer_count: usize,
    section_steps: Vec<usize>,
}

impl Topology {
    pub fn new(columns_per_layer: usize, layer_count: usize, section_steps: Vec<usize>) -> Self {
        Self {
            columns_per_layer,
            layer_count,
            section_steps,
        }
    }

    pub fn columns_per_layer(&self) -> usize {
        self.columns_per_layer
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    pub fn section_count(&self) -> usize {
        self.section_steps.len()
    }

    pub fn section_steps(&self) -> &[usize] {
        &self.section_steps
    }

    pub fn section_len(&self, section: usize) -> Option<usize> {
        self.section_steps.get(section).copied()
    }

    pub fn total_steps(&self) -> usize {
        self.section_steps.iter().sum()
    }

    pub fn total_columns(&self) -> usize {
        self.columns_per_layer * self.layer_count
    }

    /// Sum of the lengths of every section before `section`.
    pub fn section_start_step(&self, section: usize) -> Option<usize> {
        (section < self.section_steps.len()).then(|| self.section_steps[..section].iter().sum())
    }

    /// `(section, row)` containing an absolute step.
    pub fn section_at_step(&self, step: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (section, &len) in self.section_steps.iter().enumerate() {
            if step < start + len {
                return Some((section, step - start));
            }
            start += len;
        }
        None
    }

    pub fn to_absolute(&self, address: CellAddress) -> Option<AbsoluteAddress> {
        if address.layer >= self.layer_count || address.column >= self.columns_per_layer {
            return None;
        }
        if address.row >= self.section_len(address.section)? {
            return None;
        }
        Some(AbsoluteAddress {
            step: self.section_start_step(address.section)? + address.row,
            column: address.layer * self.columns_per_layer + address.column,
        })
    }

    pub fn from_absolute(&self, address: AbsoluteAddress) -> Option<CellAddress> {
        if self.columns_per_layer == 0 || address.column >= self.total_columns() {
            return None;
        }
        let (section, row) = self.section_at_step(address.step)?;
        Some(CellAddress {
            layer: address.column / self.columns_per_layer,
            section,
            row,
            column: address.column % self.columns_per_layer,
        })
    }
}
