//! In-memory drawing.
//!
//! Implements both collaborator traits over plain data. It doubles as the
//! JSON snapshot format the command-line host loads and saves, and as the
//! test fixture for every cross-module scenario.

use serde::{Deserialize, Serialize};

use crate::classify::TableShape;
use crate::error::StoreError;
use crate::model::{InstanceId, TableId};
use crate::store::{InstanceRef, InstanceStore, TableStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryAttribute {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInstance {
    pub id: InstanceId,
    pub block: String,
    pub space: String,
    #[serde(default)]
    pub in_table: bool,
    #[serde(default)]
    pub attributes: Vec<MemoryAttribute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_channel: Option<Vec<String>>,
    #[serde(default)]
    pub canonical: bool,
}

/// A block embedded in a table cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellBlock {
    pub row: usize,
    pub col: usize,
    #[serde(default)]
    pub attributes: Vec<MemoryAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryTable {
    pub id: TableId,
    pub space: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_tag: Option<TableShape>,
    #[serde(default)]
    pub cells: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cell_blocks: Vec<CellBlock>,
    /// Reject every cell write (test hook).
    #[serde(skip)]
    pub fail_writes: bool,
    /// Fail the primary regeneration path (test hook).
    #[serde(skip)]
    pub fail_regenerate: bool,
    #[serde(skip)]
    pub regenerations: usize,
}

impl MemoryTable {
    fn cols(&self) -> usize {
        self.cells.iter().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDrawing {
    #[serde(default)]
    pub block_definitions: Vec<String>,
    #[serde(default)]
    pub instances: Vec<MemoryInstance>,
    #[serde(default)]
    pub tables: Vec<MemoryTable>,
    /// Reject every instance insert once the definition check passes (test hook).
    #[serde(skip)]
    pub fail_inserts: bool,
}

fn find_attr<'a>(attrs: &'a [MemoryAttribute], tag: &str) -> Option<&'a MemoryAttribute> {
    attrs.iter().find(|a| a.tag.eq_ignore_ascii_case(tag))
}

impl MemoryDrawing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn define_block(&mut self, name: &str) -> &mut Self {
        if !self.has_block_definition(name) {
            self.block_definitions.push(name.to_string());
        }
        self
    }

    /// Add an instance of `block` with the given attributes.
    pub fn add_instance(&mut self, block: &str, space: &str, attrs: &[(&str, &str)]) -> InstanceId {
        let id = InstanceId(self.instances.iter().map(|i| i.id.0).max().unwrap_or(0) + 1);
        self.instances.push(MemoryInstance {
            id,
            block: block.to_string(),
            space: space.to_string(),
            in_table: false,
            attributes: attrs
                .iter()
                .map(|(tag, value)| MemoryAttribute {
                    tag: tag.to_string(),
                    value: value.to_string(),
                })
                .collect(),
            side_channel: None,
            canonical: false,
        });
        id
    }

    /// Add a table; the first row is usually the header.
    pub fn add_table(&mut self, space: &str, rows: &[&[&str]]) -> TableId {
        let id = TableId(self.tables.iter().map(|t| t.id.0).max().unwrap_or(0) + 1);
        self.tables.push(MemoryTable {
            id,
            space: space.to_string(),
            shape_tag: None,
            cells: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            cell_blocks: Vec::new(),
            fail_writes: false,
            fail_regenerate: false,
            regenerations: 0,
        });
        id
    }

    pub fn instance(&self, id: InstanceId) -> Option<&MemoryInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instance_mut(&mut self, id: InstanceId) -> Option<&mut MemoryInstance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    pub fn table(&self, id: TableId) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut MemoryTable> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    /// Attribute value, for assertions.
    pub fn attribute(&self, id: InstanceId, tag: &str) -> Option<&str> {
        self.instance(id)
            .and_then(|i| find_attr(&i.attributes, tag))
            .map(|a| a.value.as_str())
    }

    /// Cell text, for assertions.
    pub fn cell(&self, id: TableId, row: usize, col: usize) -> Option<&str> {
        self.table(id)
            .and_then(|t| t.cells.get(row))
            .and_then(|r| r.get(col))
            .map(String::as_str)
    }

    fn table_or_err(&self, id: TableId) -> Result<&MemoryTable, StoreError> {
        self.table(id).ok_or_else(|| StoreError::NotFound(format!("table {id}")))
    }

    fn instance_or_err(&mut self, id: InstanceId) -> Result<&mut MemoryInstance, StoreError> {
        self.instance_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {id}")))
    }
}

impl InstanceStore for MemoryDrawing {
    fn instances(&self, block_name: &str) -> Vec<InstanceRef> {
        self.instances
            .iter()
            .filter(|i| i.block.eq_ignore_ascii_case(block_name))
            .map(|i| InstanceRef {
                id: i.id,
                space: i.space.clone(),
                in_table: i.in_table,
            })
            .collect()
    }

    fn get_attribute(&self, id: InstanceId, tag: &str) -> Option<String> {
        self.attribute(id, tag).map(str::to_string)
    }

    fn set_attribute(&mut self, id: InstanceId, tag: &str, value: &str) -> Result<(), StoreError> {
        let inst = self.instance_or_err(id)?;
        match inst.attributes.iter_mut().find(|a| a.tag.eq_ignore_ascii_case(tag)) {
            Some(attr) => attr.value = value.to_string(),
            None => inst.attributes.push(MemoryAttribute {
                tag: tag.to_string(),
                value: value.to_string(),
            }),
        }
        Ok(())
    }

    fn side_channel(&self, id: InstanceId) -> Option<Vec<String>> {
        self.instance(id).and_then(|i| i.side_channel.clone())
    }

    fn set_side_channel(&mut self, id: InstanceId, fields: &[String]) -> Result<(), StoreError> {
        self.instance_or_err(id)?.side_channel = Some(fields.iter().take(3).cloned().collect());
        Ok(())
    }

    fn is_canonical(&self, id: InstanceId) -> bool {
        self.instance(id).is_some_and(|i| i.canonical)
    }

    fn set_canonical(&mut self, id: InstanceId, canonical: bool) -> Result<(), StoreError> {
        self.instance_or_err(id)?.canonical = canonical;
        Ok(())
    }

    fn has_block_definition(&self, block_name: &str) -> bool {
        self.block_definitions
            .iter()
            .any(|b| b.eq_ignore_ascii_case(block_name))
    }

    fn insert_instance(
        &mut self,
        block_name: &str,
        space: &str,
        attributes: &[(String, String)],
    ) -> Result<InstanceId, StoreError> {
        if !self.has_block_definition(block_name) {
            return Err(StoreError::NotFound(format!("block definition {block_name}")));
        }
        if self.fail_inserts {
            return Err(StoreError::ReadOnly(format!("space {space}")));
        }
        let attrs: Vec<(&str, &str)> = attributes
            .iter()
            .map(|(t, v)| (t.as_str(), v.as_str()))
            .collect();
        Ok(self.add_instance(block_name, space, &attrs))
    }
}

impl TableStore for MemoryDrawing {
    fn tables(&self) -> Vec<TableId> {
        self.tables.iter().map(|t| t.id).collect()
    }

    fn table_space(&self, id: TableId) -> Option<String> {
        self.table(id).map(|t| t.space.clone())
    }

    fn row_count(&self, id: TableId) -> usize {
        self.table(id).map_or(0, |t| t.cells.len())
    }

    fn col_count(&self, id: TableId) -> usize {
        self.table(id).map_or(0, MemoryTable::cols)
    }

    fn cell_text(&self, id: TableId, row: usize, col: usize) -> Result<String, StoreError> {
        let table = self.table_or_err(id)?;
        match table.cells.get(row) {
            // Ragged rows read as blank past their end
            Some(cells) => Ok(cells.get(col).cloned().unwrap_or_default()),
            None => Err(StoreError::NotFound(format!("table {id} row {row}"))),
        }
    }

    fn set_cell_text(&mut self, id: TableId, row: usize, col: usize, text: &str) -> Result<(), StoreError> {
        let table = self
            .table_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("table {id}")))?;
        if table.fail_writes {
            return Err(StoreError::ReadOnly(format!("table {id}")));
        }
        let cells = table
            .cells
            .get_mut(row)
            .ok_or_else(|| StoreError::NotFound(format!("table {id} row {row}")))?;
        if cells.len() <= col {
            cells.resize(col + 1, String::new());
        }
        cells[col] = text.to_string();
        Ok(())
    }

    fn cell_block_attribute(&self, id: TableId, row: usize, col: usize, tag: &str) -> Option<String> {
        self.table(id)?
            .cell_blocks
            .iter()
            .find(|b| b.row == row && b.col == col)
            .and_then(|b| find_attr(&b.attributes, tag))
            .map(|a| a.value.clone())
    }

    fn shape_tag(&self, id: TableId) -> Option<TableShape> {
        self.table(id).and_then(|t| t.shape_tag)
    }

    fn set_shape_tag(&mut self, id: TableId, shape: TableShape) -> Result<(), StoreError> {
        let table = self
            .table_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("table {id}")))?;
        if table.fail_writes {
            return Err(StoreError::ReadOnly(format!("table {id}")));
        }
        table.shape_tag = Some(shape);
        Ok(())
    }

    fn regenerate(&mut self, id: TableId) -> Result<(), StoreError> {
        let table = self
            .table_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("table {id}")))?;
        if table.fail_regenerate {
            return Err(StoreError::Failed(format!("table {id} regenerate")));
        }
        table.regenerations += 1;
        Ok(())
    }

    fn refresh_layout(&mut self, id: TableId) -> Result<(), StoreError> {
        let table = self
            .table_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("table {id}")))?;
        table.regenerations += 1;
        Ok(())
    }
}
