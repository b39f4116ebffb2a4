//! Flat-record file: one record per line, eight fixed columns.
//!
//! Export is always in key order. Import is strict: a blank or repeated key
//! rejects the whole file.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{ReconError, Result};
use crate::key::CrossingKey;
use crate::logctx::CommandLog;
use crate::model::{
    CanonicalSet, CrossingRecord, Field, InstanceContext, InstanceId, RecordValues, ReportMeta,
};
use crate::store::{write_values, InstanceStore};

pub fn header() -> [&'static str; 8] {
    Field::ALL.map(|f| f.header())
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write every record of the set, ordered by key. Returns the record count.
pub fn export<W: Write>(set: &CanonicalSet, out: W) -> Result<usize> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);

    writer.write_record(header())?;
    let mut count = 0;
    for (_, record) in set.records() {
        writer.write_record(Field::ALL.iter().map(|f| record.values.get(*f)))?;
        count += 1;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(count)
}

pub fn export_string(set: &CanonicalSet) -> Result<String> {
    let mut buf = Vec::new();
    export(set, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Parse a flat-record file. The first line is a header and is skipped;
/// blank lines are ignored; short lines are padded with empty fields.
///
/// Records come back in file order, with no instances attached.
pub fn import<R: Read>(input: R) -> Result<Vec<CrossingRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut records = Vec::new();
    let mut seen: HashMap<CrossingKey, u64> = HashMap::new();

    for (i, result) in reader.records().enumerate() {
        let row = result?;
        if i == 0 {
            continue;
        }
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let line = row.position().map(|p| p.line()).unwrap_or(i as u64 + 1);

        let mut values = RecordValues::default();
        for (field, cell) in Field::ALL.iter().zip(row.iter()) {
            values.set(*field, cell.trim());
        }

        let key = values.key().ok_or(ReconError::BlankKey { line })?;
        if let Some(first_line) = seen.get(&key) {
            return Err(ReconError::DuplicateKey {
                key: values.crossing,
                first_line: *first_line,
                line,
            });
        }
        seen.insert(key, line);
        records.push(CrossingRecord::new(values));
    }
    Ok(records)
}

pub fn import_str(input: &str) -> Result<Vec<CrossingRecord>> {
    import(input.as_bytes())
}

// ---------------------------------------------------------------------------
// Applying an import to the drawing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ImportApplyReport {
    pub meta: ReportMeta,
    pub records: usize,
    pub updated: usize,
    pub inserted: Vec<InstanceId>,
    pub write_failures: usize,
}

/// Push imported records into the drawing.
///
/// Records whose key is already known overwrite every field of every
/// instance filed under that key. Unseen keys get a new instance in the
/// primary space. If any insert is needed and the block definition is
/// missing, nothing is written at all. A failed insert is counted as a write
/// failure and the remaining records still apply.
pub fn apply_import<S: InstanceStore + ?Sized>(
    store: &mut S,
    set: &mut CanonicalSet,
    imported: Vec<CrossingRecord>,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Result<ImportApplyReport> {
    let needs_insert = imported
        .iter()
        .filter_map(CrossingRecord::key)
        .any(|k| set.get(&k).is_none());
    if needs_insert && !store.has_block_definition(&config.block_name) {
        log.error(format!("block definition '{}' missing, import not applied", config.block_name));
        return Err(ReconError::MissingBlockDefinition(config.block_name.clone()));
    }

    let mut report = ImportApplyReport {
        meta: log.meta(),
        records: imported.len(),
        updated: 0,
        inserted: Vec::new(),
        write_failures: 0,
    };

    for incoming in imported {
        let Some(key) = incoming.key() else {
            continue;
        };
        let values = incoming.values;

        if let Some(record) = set.get_mut(&key) {
            record.values = values.clone();
            let instances = record.all_instances.clone();
            for id in instances {
                for (field, e) in write_values(store, id, config, &values, &Field::ALL) {
                    report.write_failures += 1;
                    log.warn(format!("instance {id}: cannot write {field}: {e}"));
                }
                if let Some(ctx) = set.context_mut(id) {
                    ctx.values = values.clone();
                }
            }
            report.updated += 1;
            continue;
        }

        let attributes: Vec<(String, String)> = Field::TEXT
            .iter()
            .filter_map(|f| {
                let tag = config.tags.for_field(*f).first()?;
                Some((tag.clone(), values.get(*f).to_string()))
            })
            .collect();
        let id = match store.insert_instance(&config.block_name, &config.primary_space, &attributes) {
            Ok(id) => id,
            Err(e) => {
                report.write_failures += 1;
                log.warn(format!("cannot insert {}: {e}", values.crossing));
                continue;
            }
        };
        if values.has_coordinates() {
            for (field, e) in write_values(store, id, config, &values, &Field::COORDS) {
                report.write_failures += 1;
                log.warn(format!("instance {id}: cannot write {field}: {e}"));
            }
        }
        log.debug(format!("inserted {} as instance {id}", values.crossing));

        let mut record = CrossingRecord::new(values);
        record.all_instances.push(id);
        record.canonical_instance = Some(id);
        set.insert_context(InstanceContext {
            id,
            space: config.primary_space.clone(),
            in_table: false,
            values: record.values.clone(),
            ignore_for_duplicates: false,
        });
        set.insert(record);
        report.inserted.push(id);
    }

    log.info(format!(
        "import applied: {} updated, {} inserted, {} write failure(s)",
        report.updated,
        report.inserted.len(),
        report.write_failures
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(rows: &[(&str, &str)]) -> CanonicalSet {
        let mut set = CanonicalSet::new();
        for (crossing, desc) in rows {
            set.insert(CrossingRecord::new(RecordValues {
                crossing: crossing.to_string(),
                description: desc.to_string(),
                ..RecordValues::default()
            }));
        }
        set
    }

    #[test]
    fn export_orders_by_key_and_quotes_when_needed() {
        let set = set_of(&[("X10", "plain"), ("X4", "Gas, \"main\"")]);
        let text = export_string(&set).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "CROSSING,OWNER,DESCRIPTION,LOCATION,DWG_REF,LAT,LONG,ZONE");
        assert_eq!(lines[1], "X4,,\"Gas, \"\"main\"\"\",,,,,");
        assert_eq!(lines[2], "X10,,plain,,,,,");
    }

    #[test]
    fn import_pads_short_lines_and_skips_blank_ones() {
        let input = "CROSSING,OWNER,DESCRIPTION\nX4,Acme\n\nX5,Other,\"a,b\"\n";
        let records = import_str(input).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].values.owner, "Acme");
        assert_eq!(records[0].values.zone, "");
        assert_eq!(records[1].values.description, "a,b");
    }

    #[test]
    fn blank_key_rejects_whole_file() {
        let err = import_str("CROSSING,OWNER\nX4,Acme\n,Orphan\n").unwrap_err();
        assert!(matches!(err, ReconError::BlankKey { line: 3 }));
    }

    #[test]
    fn duplicate_key_rejects_whole_file() {
        let err = import_str("CROSSING\nX4\nX5\nX04\n").unwrap_err();
        match err {
            ReconError::DuplicateKey { key, first_line, line } => {
                assert_eq!(key, "X04");
                assert_eq!(first_line, 2);
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn header_only_file_is_empty() {
        assert!(import_str("CROSSING,OWNER\n").unwrap().is_empty());
        assert!(import_str("").unwrap().is_empty());
    }
}
