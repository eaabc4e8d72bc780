//! Cell store
//!
//! Ordered notebook cells with per-cell dirty tracking. Between two
//! successive `clear_dirty` calls the dirty set is exactly the cells
//! changed by a mutating call, which is what lets the observation payload
//! mark `isUpdate` precisely once per outbound turn.

use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};

use crate::error::{ActionFailureKind, EngineError};
use crate::types::cell::{Cell, CellKind, CellOutput};
use crate::types::protocol::{CellPayload, NotebookSummary};

/// Change-detection snapshot taken per cell at every `clear_dirty`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CellSnapshot {
    content_len: usize,
    outputs_count: usize,
    metadata_hash: u64,
}

impl CellSnapshot {
    fn of(cell: &Cell) -> Self {
        Self {
            content_len: cell.content.len(),
            outputs_count: cell.outputs.len(),
            metadata_hash: hash_metadata(&cell.metadata),
        }
    }
}

fn hash_metadata(metadata: &Map<String, Value>) -> u64 {
    // serde_json maps serialize with sorted keys, so this is stable.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serde_json::to_string(metadata)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

/// Ordered notebook cells, indexed by id.
#[derive(Debug, Default)]
pub struct CellStore {
    cells: Vec<Cell>,
    index: HashMap<String, usize>,
    snapshots: HashMap<String, CellSnapshot>,
    dirty: BTreeSet<String>,
    title: String,
    execution_count: u64,
}

impl CellStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a cell. The new cell starts dirty.
    ///
    /// Returns the cell id. Duplicate ids are rejected: cell ids are unique
    /// within a notebook.
    pub fn add(&mut self, cell: Cell) -> Result<String, EngineError> {
        if self.index.contains_key(&cell.id) {
            return Err(EngineError::InternalError(format!(
                "duplicate cell id {}",
                cell.id
            )));
        }
        let id = cell.id.clone();
        self.snapshots.insert(id.clone(), CellSnapshot::of(&cell));
        self.dirty.insert(id.clone());
        self.index.insert(id.clone(), self.cells.len());
        self.cells.push(cell);
        Ok(id)
    }

    /// Replace a cell's content. Dirty only if the text actually changes.
    pub fn update_content(&mut self, id: &str, text: &str) -> Result<(), EngineError> {
        let cell = self.get_mut(id)?;
        if cell.content != text {
            cell.content = text.to_string();
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// Append execution outputs. Dirty iff at least one output was added.
    pub fn append_outputs(
        &mut self,
        id: &str,
        outputs: Vec<CellOutput>,
    ) -> Result<(), EngineError> {
        if outputs.is_empty() {
            self.get(id)?;
            return Ok(());
        }
        let cell = self.get_mut(id)?;
        cell.outputs.extend(outputs);
        self.mark_dirty(id);
        Ok(())
    }

    /// Drop all outputs. Dirty iff there was anything to drop.
    pub fn clear_outputs(&mut self, id: &str) -> Result<(), EngineError> {
        let cell = self.get_mut(id)?;
        if !cell.outputs.is_empty() {
            cell.outputs.clear();
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// Merge a metadata patch. Dirty iff any key actually changes.
    pub fn update_metadata(
        &mut self,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<(), EngineError> {
        let cell = self.get_mut(id)?;
        let mut changed = false;
        for (key, value) in patch {
            if cell.metadata.get(&key) != Some(&value) {
                cell.metadata.insert(key, value);
                changed = true;
            }
        }
        if changed {
            self.mark_dirty(id);
        }
        Ok(())
    }

    /// Ids of cells changed since the last `clear_dirty`.
    pub fn dirty_ids(&self) -> BTreeSet<String> {
        self.dirty.clone()
    }

    /// Re-snapshot every cell and clear the dirty set.
    pub fn clear_dirty(&mut self) {
        for cell in &self.cells {
            self.snapshots
                .insert(cell.id.clone(), CellSnapshot::of(cell));
        }
        self.dirty.clear();
    }

    /// Cells in insertion order, serialized for an observation payload.
    /// When `include_dirty_flag` is set each cell carries `isUpdate`.
    pub fn to_payload(&self, include_dirty_flag: bool) -> Vec<CellPayload> {
        self.cells
            .iter()
            .map(|cell| CellPayload {
                id: cell.id.clone(),
                kind: cell.kind,
                content: cell.content.clone(),
                outputs: cell.outputs.clone(),
                is_update: include_dirty_flag.then(|| self.dirty.contains(&cell.id)),
            })
            .collect()
    }

    /// Notebook summary for the observation payload.
    pub fn summary(&self, include_dirty_flag: bool) -> NotebookSummary {
        let last = self.cells.last();
        NotebookSummary {
            title: self.title.clone(),
            cells: self.to_payload(include_dirty_flag),
            cell_count: self.cells.len(),
            last_cell_type: last.map(|c| c.kind),
            last_output: last
                .and_then(|c| c.outputs.last())
                .map(|o| o.content.clone()),
        }
    }

    pub fn cell(&self, id: &str) -> Option<&Cell> {
        self.index.get(id).map(|&i| &self.cells[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn last_cell(&self) -> Option<&Cell> {
        self.cells.last()
    }

    /// Most recent cell of the given kind.
    pub fn last_cell_of_kind(&self, kind: CellKind) -> Option<&Cell> {
        self.cells.iter().rev().find(|c| c.kind == kind)
    }

    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn bump_execution_count(&mut self) -> u64 {
        self.execution_count += 1;
        self.execution_count
    }

    /// Rebuild the store from previously serialized cells.
    pub(crate) fn load(&mut self, cells: Vec<Cell>, title: String, execution_count: u64) {
        self.cells.clear();
        self.index.clear();
        self.snapshots.clear();
        self.dirty.clear();
        self.title = title;
        self.execution_count = execution_count;
        for cell in cells {
            self.snapshots.insert(cell.id.clone(), CellSnapshot::of(&cell));
            self.index.insert(cell.id.clone(), self.cells.len());
            self.cells.push(cell);
        }
    }

    fn get(&self, id: &str) -> Result<&Cell, EngineError> {
        self.cell(id).ok_or_else(|| {
            EngineError::action_failure(ActionFailureKind::UnknownCell, format!("no cell {id}"))
        })
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Cell, EngineError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.cells[i]),
            None => Err(EngineError::action_failure(
                ActionFailureKind::UnknownCell,
                format!("no cell {id}"),
            )),
        }
    }

    fn mark_dirty(&mut self, id: &str) {
        self.dirty.insert(id.to_string());
        if let Some(cell) = self.cell(id) {
            let snap = CellSnapshot::of(cell);
            self.snapshots.insert(id.to_string(), snap);
        }
    }
}
