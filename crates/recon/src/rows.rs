use crate::classify::TableLayout;
use crate::config::EngineConfig;
use crate::logctx::CommandLog;
use crate::model::{Field, RecordValues, TableId};
use crate::store::TableStore;

/// One data row of a classified table, read through its column map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub row: usize,
    /// Raw key text as found in the table.
    pub key_text: String,
    /// Key came from a block embedded in the key cell, not the cell text.
    pub key_from_block: bool,
    pub values: RecordValues,
}

/// Key of a row: the key cell's text, else an attribute of a block in that
/// cell, by tag priority.
pub fn read_row_key<S: TableStore + ?Sized>(
    store: &S,
    table: TableId,
    row: usize,
    key_col: usize,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Option<(String, bool)> {
    match store.cell_text(table, row, key_col) {
        Ok(text) if !text.trim().is_empty() => return Some((text.trim().to_string(), false)),
        Ok(_) => {}
        Err(e) => log.debug(format!("table {table}: cannot read key cell ({row},{key_col}): {e}")),
    }
    config.cell_key_tags.iter().find_map(|tag| {
        store
            .cell_block_attribute(table, row, key_col, tag)
            .filter(|v| !v.trim().is_empty())
            .map(|v| (v.trim().to_string(), true))
    })
}

/// Read one data row. Unreadable cells are blank.
pub fn read_row<S: TableStore + ?Sized>(
    store: &S,
    layout: &TableLayout,
    row: usize,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> TableRow {
    let mut values = RecordValues::default();
    let mut key_text = String::new();
    let mut key_from_block = false;

    for (col, field) in &layout.columns {
        if *field == Field::Crossing {
            if let Some((text, from_block)) =
                read_row_key(store, layout.table, row, *col, config, log)
            {
                key_text = text;
                key_from_block = from_block;
            }
            values.crossing = key_text.clone();
            continue;
        }
        match store.cell_text(layout.table, row, *col) {
            Ok(text) => values.set(*field, text.trim()),
            Err(e) => log.debug(format!(
                "table {}: cannot read cell ({row},{col}): {e}",
                layout.table
            )),
        }
    }

    TableRow {
        row,
        key_text,
        key_from_block,
        values,
    }
}

/// Every data row after the header.
pub fn read_rows<S: TableStore + ?Sized>(
    store: &S,
    layout: &TableLayout,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Vec<TableRow> {
    (layout.data_start..layout.rows)
        .map(|row| read_row(store, layout, row, config, log))
        .collect()
}
