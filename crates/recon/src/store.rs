//! Collaborator contracts for the host drawing database.
//!
//! The engine never discovers host capabilities at runtime; a host implements
//! these two traits and hands itself to the entry points in [`crate::engine`].

use serde::{Deserialize, Serialize};

use crate::classify::TableShape;
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::logctx::CommandLog;
use crate::model::{Field, InstanceId, RecordValues, TableId};

/// One enumerated block instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRef {
    pub id: InstanceId,
    /// Name of the containing layout space.
    pub space: String,
    /// Sits inside some table's visual bounds.
    pub in_table: bool,
}

pub trait InstanceStore {
    /// Instances of `block_name` across every layout space, traversal order.
    fn instances(&self, block_name: &str) -> Vec<InstanceRef>;

    /// Case-insensitive attribute read.
    fn get_attribute(&self, id: InstanceId, tag: &str) -> Option<String>;

    fn set_attribute(&mut self, id: InstanceId, tag: &str, value: &str) -> Result<(), StoreError>;

    /// Up to three ordered fields: lat, long, zone.
    fn side_channel(&self, id: InstanceId) -> Option<Vec<String>>;

    fn set_side_channel(&mut self, id: InstanceId, fields: &[String]) -> Result<(), StoreError>;

    /// Persisted marker left by an accepted duplicate resolution.
    fn is_canonical(&self, id: InstanceId) -> bool;

    fn set_canonical(&mut self, id: InstanceId, canonical: bool) -> Result<(), StoreError>;

    fn has_block_definition(&self, block_name: &str) -> bool;

    fn insert_instance(
        &mut self,
        block_name: &str,
        space: &str,
        attributes: &[(String, String)],
    ) -> Result<InstanceId, StoreError>;
}

pub trait TableStore {
    /// Tables across every layout space.
    fn tables(&self) -> Vec<TableId>;

    fn table_space(&self, id: TableId) -> Option<String>;

    fn row_count(&self, id: TableId) -> usize;

    fn col_count(&self, id: TableId) -> usize;

    fn cell_text(&self, id: TableId, row: usize, col: usize) -> Result<String, StoreError>;

    fn set_cell_text(&mut self, id: TableId, row: usize, col: usize, text: &str)
        -> Result<(), StoreError>;

    /// Attribute of a block embedded in a cell, if any.
    fn cell_block_attribute(&self, id: TableId, row: usize, col: usize, tag: &str)
        -> Option<String>;

    fn shape_tag(&self, id: TableId) -> Option<TableShape>;

    fn set_shape_tag(&mut self, id: TableId, shape: TableShape) -> Result<(), StoreError>;

    /// Primary layout regeneration path.
    fn regenerate(&mut self, id: TableId) -> Result<(), StoreError>;

    /// Secondary path, tried once when [`TableStore::regenerate`] fails.
    fn refresh_layout(&mut self, id: TableId) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Field access over synonym lists
// ---------------------------------------------------------------------------

/// First synonym the instance carries.
pub fn read_field<S: InstanceStore + ?Sized>(
    store: &S,
    id: InstanceId,
    tags: &[String],
) -> Option<String> {
    tags.iter().find_map(|tag| store.get_attribute(id, tag))
}

/// Write to the first synonym the instance already carries, else the first.
pub fn write_field<S: InstanceStore + ?Sized>(
    store: &mut S,
    id: InstanceId,
    tags: &[String],
    value: &str,
) -> Result<(), StoreError> {
    let tag = tags
        .iter()
        .find(|tag| store.get_attribute(id, tag).is_some())
        .or_else(|| tags.first())
        .ok_or_else(|| StoreError::NotFound("attribute tag".into()))?;
    store.set_attribute(id, tag, value)
}

/// Current values of one instance: text attributes plus side-channel
/// coordinates.
pub fn read_values<S: InstanceStore + ?Sized>(
    store: &S,
    id: InstanceId,
    config: &EngineConfig,
) -> RecordValues {
    let mut values = RecordValues::default();
    for field in Field::TEXT {
        if let Some(v) = read_field(store, id, config.tags.for_field(field)) {
            values.set(field, v.trim());
        }
    }
    if let Some(side) = store.side_channel(id) {
        for (field, v) in Field::COORDS.iter().zip(side.iter()) {
            values.set(*field, v.trim());
        }
    }
    values
}

/// Write the selected fields of `values` to one instance.
///
/// Every field is attempted; failures are returned rather than aborting the
/// remaining writes.
pub fn write_values<S: InstanceStore + ?Sized>(
    store: &mut S,
    id: InstanceId,
    config: &EngineConfig,
    values: &RecordValues,
    fields: &[Field],
) -> Vec<(Field, StoreError)> {
    let mut failures = Vec::new();
    for field in fields.iter().filter(|f| !f.is_coordinate()) {
        if let Err(e) = write_field(store, id, config.tags.for_field(*field), values.get(*field)) {
            failures.push((*field, e));
        }
    }

    let coords: Vec<Field> = fields.iter().copied().filter(Field::is_coordinate).collect();
    if !coords.is_empty() {
        let mut side = store.side_channel(id).unwrap_or_default();
        side.resize(Field::COORDS.len(), String::new());
        for (i, field) in Field::COORDS.iter().enumerate() {
            if coords.contains(field) {
                side[i] = values.get(*field).to_string();
            }
        }
        if let Err(e) = store.set_side_channel(id, &side) {
            failures.push((coords[0], e));
        }
    }
    failures
}

/// Ask a table to redraw: primary path, then the secondary path once.
pub fn regenerate_table<S: TableStore + ?Sized>(store: &mut S, id: TableId, log: &mut CommandLog) {
    match store.regenerate(id) {
        Ok(()) => {}
        Err(first) => {
            log.debug(format!("table {id}: regenerate failed ({first}), refreshing layout"));
            if let Err(second) = store.refresh_layout(id) {
                log.warn(format!("table {id}: layout refresh failed: {second}"));
            }
        }
    }
}
