//! Conversion between the live grid and portable collaboration snapshots.
//! Each section becomes one scene; cells name samples by stable id.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use seq_engine::NativeEngine;
use seq_project::{
    SNAPSHOT_VERSION, SampleDescriptor, Scene, SceneLayer, Snapshot, SnapshotCell,
    SnapshotMetadata,
};
use seq_transport::MAX_SECTION_LOOPS;

use crate::bridge::NativeSyncBridge;
use crate::cell::{Cell, Override};
use crate::error::{Error, Result};
use crate::grid::{
    GridState, GridStore, Layer, MIN_SECTION_STEPS, Section, check_dimensions, layer_label,
    section_label,
};
use crate::sample_bank::{SampleBank, SampleSource};

pub fn export_snapshot<E: NativeEngine>(
    grid: &GridStore<E>,
    bank: &SampleBank,
    metadata: SnapshotMetadata,
) -> Snapshot {
    let columns_per_layer = grid.columns_per_layer();
    let slot_id = |slot: usize| {
        bank.slot(slot)
            .map_or_else(|| format!("slot-{slot}"), |slot| slot.stable_id())
    };

    let mut used = BTreeSet::new();
    let scenes = grid
        .sections()
        .iter()
        .enumerate()
        .map(|(section, meta)| {
            let range = grid.section_range(section).unwrap_or(0..0);
            let layers = grid
                .layers()
                .iter()
                .map(|layer| SceneLayer {
                    label: layer.label.clone(),
                    rows: range
                        .clone()
                        .map(|step| {
                            let row = &layer.cells
                                [step * columns_per_layer..(step + 1) * columns_per_layer];
                            row.iter()
                                .map(|cell| {
                                    let slot = cell.sample_slot?;
                                    used.insert(slot);
                                    Some(SnapshotCell {
                                        sample_id: slot_id(slot),
                                        volume: cell.volume.value(),
                                        pitch: cell.pitch.value(),
                                    })
                                })
                                .collect()
                        })
                        .collect(),
                })
                .collect();
            Scene {
                name: meta.label.clone(),
                layers,
                loops: meta.loops,
            }
        })
        .collect();

    let samples = used
        .into_iter()
        .map(|slot| match bank.slot(slot) {
            Some(entry) => SampleDescriptor {
                id: entry.stable_id(),
                name: entry.name(),
                url: entry
                    .source
                    .as_ref()
                    .map(SampleSource::to_record_string)
                    .unwrap_or_default(),
            },
            None => SampleDescriptor {
                id: slot_id(slot),
                name: format!("Slot {}", slot + 1),
                url: String::new(),
            },
        })
        .collect();

    Snapshot {
        version: SNAPSHOT_VERSION,
        metadata,
        scenes,
        samples,
    }
}

/// A snapshot mapped onto the local bank, ready to apply.
#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub state: GridState,
    pub bpm: u32,
    /// Samples that need a slot of their own, with the slot chosen for them.
    pub assignments: Vec<(usize, SampleDescriptor)>,
    /// Sample ids that found no slot; their cells were dropped.
    pub unplaced: Vec<String>,
}

/// Map sample ids to local slots and lay the scenes out as sections. Ids the
/// bank already knows reuse that slot; others take the first free slots.
pub fn import_snapshot(snapshot: &Snapshot, bank: &SampleBank) -> Result<ImportPlan> {
    let mut slots: BTreeMap<&str, usize> = BTreeMap::new();
    let mut reserved = BTreeSet::new();
    let mut assignments = Vec::new();
    let mut unplaced = Vec::new();

    for sample in &snapshot.samples {
        if let Some(slot) = bank.find_by_sample_id(&sample.id) {
            slots.insert(&sample.id, slot);
            continue;
        }
        let free = bank
            .slots()
            .iter()
            .find(|slot| !slot.is_assigned() && !reserved.contains(&slot.index))
            .map(|slot| slot.index);
        match free {
            Some(slot) => {
                reserved.insert(slot);
                slots.insert(&sample.id, slot);
                assignments.push((slot, sample.clone()));
            }
            None => unplaced.push(sample.id.clone()),
        }
    }

    let columns_per_layer = snapshot
        .scenes
        .iter()
        .flat_map(|scene| &scene.layers)
        .flat_map(|layer| &layer.rows)
        .map(Vec::len)
        .max()
        .unwrap_or(1)
        .max(1);
    let layer_count = snapshot
        .scenes
        .iter()
        .map(|scene| scene.layers.len())
        .max()
        .unwrap_or(1)
        .max(1);

    let mut sections: Vec<Section> = snapshot
        .scenes
        .iter()
        .map(|scene| Section {
            steps: scene
                .layers
                .iter()
                .map(|layer| layer.rows.len())
                .max()
                .unwrap_or(0)
                .max(MIN_SECTION_STEPS),
            label: scene.name.clone(),
            loops: scene.loops.clamp(1, MAX_SECTION_LOOPS),
        })
        .collect();
    if sections.is_empty() {
        sections.push(Section::new(MIN_SECTION_STEPS, section_label(0)));
    }
    let total_steps = sections
        .iter()
        .try_fold(0usize, |sum, section| sum.checked_add(section.steps))
        .ok_or(Error::StructuralLimit("pattern exceeds the engine step table"))?;
    check_dimensions(columns_per_layer, layer_count, total_steps)?;

    let mut layers: Vec<Layer> = (0..layer_count)
        .map(|index| Layer {
            label: snapshot
                .scenes
                .iter()
                .find_map(|scene| scene.layers.get(index))
                .map_or_else(|| layer_label(index), |layer| layer.label.clone()),
            cells: vec![Cell::EMPTY; total_steps * columns_per_layer],
        })
        .collect();

    let mut start = 0;
    for (scene, section) in snapshot.scenes.iter().zip(&sections) {
        for (layer, scene_layer) in layers.iter_mut().zip(&scene.layers) {
            for (row, cells) in scene_layer.rows.iter().enumerate() {
                for (column, cell) in cells.iter().enumerate() {
                    let Some(cell) = cell else {
                        continue;
                    };
                    let Some(&slot) = slots.get(cell.sample_id.as_str()) else {
                        continue;
                    };
                    layer.cells[(start + row) * columns_per_layer + column] = Cell {
                        sample_slot: Some(slot),
                        volume: Override::from(cell.volume),
                        pitch: Override::from(cell.pitch),
                    };
                }
            }
        }
        start += section.steps;
    }

    let state = GridState {
        columns_per_layer,
        layers,
        sections,
        layer_order: (0..layer_count).collect(),
        active_layer: 0,
        active_section: 0,
    };
    state.validate()?;

    if !unplaced.is_empty() {
        log::warn!("no free slot for {} snapshot samples", unplaced.len());
    }
    Ok(ImportPlan {
        state,
        bpm: seq_transport::clamp_bpm(snapshot.metadata.bpm),
        assignments,
        unplaced,
    })
}

/// Assign and load the plan's new samples. Samples without a reachable file
/// stay assigned but unloaded. Returns the number loaded.
pub fn apply_assignments<E: NativeEngine>(
    plan: &ImportPlan,
    bank: &mut SampleBank,
    bridge: &mut NativeSyncBridge<E>,
    assets_root: &Path,
) -> usize {
    let mut loaded = 0;
    for (slot, sample) in &plan.assignments {
        if sample.url.is_empty() {
            continue;
        }
        let source = SampleSource::from_record_string(&sample.url);
        if bank
            .assign(
                *slot,
                source.clone(),
                Some(sample.name.clone()),
                Some(sample.id.clone()),
            )
            .is_err()
        {
            continue;
        }
        match bridge.load_sample(*slot, &source.resolve(assets_root)) {
            Ok(()) => {
                let _ = bank.set_loaded(*slot, true);
                loaded += 1;
            }
            Err(err) => log::warn!("sample {} could not be loaded: {err}", sample.id),
        }
    }
    loaded
}
