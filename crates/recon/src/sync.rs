use serde::Serialize;

use crate::aggregate::layouts;
use crate::classify::{TableLayout, TableShape};
use crate::config::EngineConfig;
use crate::logctx::CommandLog;
use crate::matcher::{KeyMatch, RecordIndex};
use crate::model::{CanonicalSet, Field, ReportMeta, TableId};
use crate::rows::{read_row, TableRow};
use crate::store::{regenerate_table, TableStore};

#[derive(Debug, Clone, Serialize)]
pub struct TableSync {
    pub table: TableId,
    pub shape: TableShape,
    pub rows: usize,
    pub matched: usize,
    /// Matched rows where at least one cell differed before the write.
    pub changed: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
    pub cell_failures: usize,
    pub tag_persisted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub meta: ReportMeta,
    pub tables: Vec<TableSync>,
    pub skipped: Vec<TableId>,
}

impl SyncReport {
    pub fn changed_rows(&self) -> usize {
        self.tables.iter().map(|t| t.changed).sum()
    }
}

/// Persist the shape of a header-classified table so later passes trust it.
/// Best effort; returns whether a tag was written.
pub fn persist_tag<S: TableStore + ?Sized>(
    store: &mut S,
    layout: &TableLayout,
    log: &mut CommandLog,
) -> bool {
    if layout.from_tag || layout.shape == TableShape::Unknown {
        return false;
    }
    match store.set_shape_tag(layout.table, layout.shape) {
        Ok(()) => true,
        Err(e) => {
            log.warn(format!("table {}: cannot persist shape tag: {e}", layout.table));
            false
        }
    }
}

fn match_row(index: &RecordIndex, set: &CanonicalSet, layout: &TableLayout, row: &TableRow) -> KeyMatch {
    if layout.shape == TableShape::LatLong {
        index.resolve_coordinate_row(set, &row.values)
    } else {
        index.resolve(set, &row.key_text)
    }
}

/// Push canonical values into one classified table.
///
/// Every mapped cell of a matched row is written, whether or not it
/// differs; the changed flag is only counted. A key read from an embedded
/// block is left alone. Unmatched rows are untouched.
pub fn sync_table<S: TableStore + ?Sized>(
    store: &mut S,
    set: &CanonicalSet,
    index: &RecordIndex,
    layout: &TableLayout,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> TableSync {
    let mut result = TableSync {
        table: layout.table,
        shape: layout.shape,
        rows: 0,
        matched: 0,
        changed: 0,
        unmatched: 0,
        ambiguous: 0,
        cell_failures: 0,
        tag_persisted: false,
    };

    for r in layout.data_start..layout.rows {
        let row = read_row(&*store, layout, r, config, log);
        if row.key_text.is_empty() {
            continue;
        }
        result.rows += 1;

        let key = match match_row(index, set, layout, &row) {
            KeyMatch::Unique(key, _) => key,
            KeyMatch::Ambiguous(keys) => {
                result.ambiguous += 1;
                log.warn(format!(
                    "table {}: row {} key '{}' matches {} records, left untouched",
                    layout.table,
                    r + 1,
                    row.key_text,
                    keys.len()
                ));
                continue;
            }
            KeyMatch::None => {
                result.unmatched += 1;
                continue;
            }
        };
        let Some(record) = set.get(&key) else {
            result.unmatched += 1;
            continue;
        };
        result.matched += 1;

        let mut changed = false;
        for (col, field) in &layout.columns {
            if *field == Field::Crossing && row.key_from_block {
                continue;
            }
            let desired = record.values.get(*field);
            if row.values.get(*field).trim() != desired.trim() {
                changed = true;
            }
            if let Err(e) = store.set_cell_text(layout.table, r, *col, desired) {
                result.cell_failures += 1;
                log.warn(format!(
                    "table {}: cannot write ({r},{col}) {field}: {e}",
                    layout.table
                ));
            }
        }
        if changed {
            result.changed += 1;
        }
    }

    regenerate_table(store, layout.table, log);
    result.tag_persisted = persist_tag(store, layout, log);
    log.debug(format!(
        "table {} ({}): {} matched, {} changed, {} unmatched",
        layout.table, layout.shape, result.matched, result.changed, result.unmatched
    ));
    result
}

/// Canonical → every classified table. Unknown tables are skipped.
pub fn sync_tables<S: TableStore + ?Sized>(
    store: &mut S,
    set: &CanonicalSet,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> SyncReport {
    let index = RecordIndex::build(set);
    let mut report = SyncReport {
        meta: log.meta(),
        tables: Vec::new(),
        skipped: Vec::new(),
    };
    for layout in layouts(&*store, config, log) {
        if layout.shape == TableShape::Unknown {
            report.skipped.push(layout.table);
            continue;
        }
        report.tables.push(sync_table(store, set, &index, &layout, config, log));
    }
    log.info(format!(
        "synced {} table(s), {} row(s) changed, {} skipped",
        report.tables.len(),
        report.changed_rows(),
        report.skipped.len()
    ));
    report
}
