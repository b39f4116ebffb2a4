//! Adopt one table as ground truth: push its rows back into block
//! instances. Coordinates never flow in this direction.

use std::collections::HashMap;

use serde::Serialize;

use crate::classify::{TableLayout, TableShape};
use crate::config::EngineConfig;
use crate::key::exact_key;
use crate::logctx::CommandLog;
use crate::matcher::normalize_text;
use crate::model::{Field, InstanceId, RecordValues, ReportMeta, TableId};
use crate::rows::{read_rows, TableRow};
use crate::store::{read_values, write_field, write_values, InstanceStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Key,
    Composite,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdoptedInstance {
    pub id: InstanceId,
    pub row: usize,
    pub matched_by: MatchedBy,
    pub crossing: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReverseReport {
    pub meta: ReportMeta,
    pub table: TableId,
    pub shape: TableShape,
    pub skipped: Option<String>,
    pub adopted: Vec<AdoptedInstance>,
    pub unmatched: Vec<InstanceId>,
    /// Row keys seen more than once; the first row wins.
    pub duplicate_keys: Vec<String>,
    pub write_failures: usize,
}

/// Text fields the table is authoritative for.
pub fn adopted_fields(shape: TableShape) -> &'static [Field] {
    match shape {
        TableShape::Main => &[Field::Owner, Field::Description, Field::Location, Field::DwgRef],
        TableShape::Page => &[Field::Owner, Field::Description],
        TableShape::LatLong | TableShape::Unknown => &[],
    }
}

fn composite(shape: TableShape, values: &RecordValues) -> Vec<String> {
    adopted_fields(shape)
        .iter()
        .map(|f| normalize_text(values.get(*f)))
        .collect()
}

struct CompositeEntry {
    row: usize,
    /// First non-blank key among rows sharing the tuple.
    key: Option<String>,
}

/// Row indices by primary key and by composite text tuple.
pub struct TableIndex {
    rows: Vec<TableRow>,
    by_key: HashMap<String, usize>,
    by_composite: HashMap<Vec<String>, CompositeEntry>,
    pub duplicate_keys: Vec<String>,
}

impl TableIndex {
    pub fn build(shape: TableShape, rows: Vec<TableRow>) -> Self {
        let mut by_key = HashMap::new();
        let mut by_composite: HashMap<Vec<String>, CompositeEntry> = HashMap::new();
        let mut duplicate_keys = Vec::new();

        for (i, row) in rows.iter().enumerate() {
            if !row.key_text.is_empty() {
                let k = exact_key(&row.key_text);
                if by_key.contains_key(&k) {
                    duplicate_keys.push(row.key_text.clone());
                } else {
                    by_key.insert(k, i);
                }
            }

            let tuple = composite(shape, &row.values);
            if tuple.iter().all(String::is_empty) {
                continue;
            }
            let entry = by_composite.entry(tuple).or_insert(CompositeEntry { row: i, key: None });
            if entry.key.is_none() && !row.key_text.is_empty() {
                entry.key = Some(row.key_text.clone());
            }
        }

        Self {
            rows,
            by_key,
            by_composite,
            duplicate_keys,
        }
    }

    pub fn by_key(&self, text: &str) -> Option<&TableRow> {
        if text.trim().is_empty() {
            return None;
        }
        self.by_key.get(&exact_key(text)).map(|i| &self.rows[*i])
    }

    /// Row with the same composite tuple, plus the key recorded for it.
    pub fn by_composite(&self, tuple: &[String]) -> Option<(&TableRow, Option<&str>)> {
        self.by_composite
            .get(tuple)
            .map(|e| (&self.rows[e.row], e.key.as_deref()))
    }
}

/// Overwrite matched instances from the adopted table.
pub fn adopt_table<D: InstanceStore + ?Sized>(
    drawing: &mut D,
    layout: &TableLayout,
    rows: Vec<TableRow>,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> ReverseReport {
    let mut report = ReverseReport {
        meta: log.meta(),
        table: layout.table,
        shape: layout.shape,
        skipped: None,
        adopted: Vec::new(),
        unmatched: Vec::new(),
        duplicate_keys: Vec::new(),
        write_failures: 0,
    };
    let fields = adopted_fields(layout.shape);
    if fields.is_empty() {
        let reason = format!("{} tables cannot be adopted", layout.shape);
        log.warn(format!("table {}: {reason}", layout.table));
        report.skipped = Some(reason);
        return report;
    }

    let index = TableIndex::build(layout.shape, rows);
    for key in &index.duplicate_keys {
        log.warn(format!("table {}: key '{key}' appears more than once, first row used", layout.table));
    }
    report.duplicate_keys = index.duplicate_keys.clone();

    let live: Vec<_> = drawing
        .instances(&config.block_name)
        .into_iter()
        .filter(|r| !r.in_table)
        .collect();

    for inst in live {
        let current = read_values(&*drawing, inst.id, config);
        let (row, matched_by, recorded_key) = match index.by_key(&current.crossing) {
            Some(row) => (row, MatchedBy::Key, None),
            None => match index.by_composite(&composite(layout.shape, &current)) {
                Some((row, key)) => (row, MatchedBy::Composite, key),
                None => {
                    report.unmatched.push(inst.id);
                    continue;
                }
            },
        };

        let crossing = [Some(row.key_text.as_str()), recorded_key, Some(current.crossing.as_str())]
            .into_iter()
            .flatten()
            .find(|k| !k.trim().is_empty())
            .unwrap_or_default()
            .to_string();

        for (field, e) in write_values(drawing, inst.id, config, &row.values, fields) {
            report.write_failures += 1;
            log.warn(format!("instance {}: cannot write {field}: {e}", inst.id));
        }
        if !crossing.is_empty() {
            if let Err(e) = write_field(drawing, inst.id, config.tags.for_field(Field::Crossing), &crossing) {
                report.write_failures += 1;
                log.warn(format!("instance {}: cannot write key: {e}", inst.id));
            }
        }
        report.adopted.push(AdoptedInstance {
            id: inst.id,
            row: row.row,
            matched_by,
            crossing,
        });
    }

    log.info(format!(
        "adopted table {}: {} instance(s) updated, {} unmatched",
        layout.table,
        report.adopted.len(),
        report.unmatched.len()
    ));
    report
}

/// Read the table's rows and adopt them.
pub fn adopt<D>(
    drawing: &mut D,
    layout: &TableLayout,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> ReverseReport
where
    D: InstanceStore + crate::store::TableStore + ?Sized,
{
    let rows = read_rows(&*drawing, layout, config, log);
    adopt_table(drawing, layout, rows, config, log)
}
