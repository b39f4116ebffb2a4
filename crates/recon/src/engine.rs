use std::io::{Read, Write};

use serde::Serialize;

use crate::aggregate::{self, layouts, ScanReport};
use crate::classify::{TableLayout, TableShape};
use crate::config::EngineConfig;
use crate::duplicates::{self, DuplicateKind, ResolutionReport, ResolutionUi};
use crate::error::{ReconError, Result, StoreError};
use crate::flatfile::{self, ImportApplyReport};
use crate::logctx::CommandLog;
use crate::model::{CanonicalSet, ReportMeta, TableId};
use crate::reverse::{self, ReverseReport};
use crate::store::{InstanceStore, TableStore};
use crate::sync::{self, persist_tag, SyncReport};

/// Build the canonical record set from the drawing. Never writes.
pub fn scan<D>(drawing: &D, config: &EngineConfig, log: &mut CommandLog) -> (CanonicalSet, ScanReport)
where
    D: InstanceStore + TableStore + ?Sized,
{
    aggregate::scan(drawing, config, log)
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyReport {
    pub meta: ReportMeta,
    pub tables: Vec<TableLayout>,
    pub tags_persisted: usize,
}

/// Classify every table and persist the tag of header-classified ones.
pub fn classify_tables<D: TableStore + ?Sized>(
    drawing: &mut D,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> ClassifyReport {
    let tables = layouts(&*drawing, config, log);
    let mut tags_persisted = 0;
    for layout in &tables {
        if persist_tag(drawing, layout, log) {
            tags_persisted += 1;
        }
    }
    log.info(format!(
        "classified {} table(s), {} unknown, {tags_persisted} tag(s) persisted",
        tables.len(),
        tables.iter().filter(|t| t.shape == TableShape::Unknown).count()
    ));
    ClassifyReport {
        meta: log.meta(),
        tables,
        tags_persisted,
    }
}

/// Scan, then run one resolution pass of `kind`.
///
/// Returns the set as it stands after the pass: unchanged on cancel.
pub fn resolve_duplicates<D, U>(
    drawing: &mut D,
    kind: DuplicateKind,
    ui: &mut U,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> (CanonicalSet, ResolutionReport)
where
    D: InstanceStore + TableStore + ?Sized,
    U: ResolutionUi + ?Sized,
{
    let (mut set, _) = aggregate::scan(&*drawing, config, log);
    let report = duplicates::resolve(drawing, &mut set, kind, ui, config, log);
    (set, report)
}

/// Scan, then push canonical values into every classified table.
pub fn sync_tables<D>(drawing: &mut D, config: &EngineConfig, log: &mut CommandLog) -> SyncReport
where
    D: InstanceStore + TableStore + ?Sized,
{
    let (set, _) = aggregate::scan(&*drawing, config, log);
    sync::sync_tables(drawing, &set, config, log)
}

/// Treat one table as ground truth for the instances it describes.
pub fn adopt_table<D>(
    drawing: &mut D,
    table: TableId,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Result<ReverseReport>
where
    D: InstanceStore + TableStore + ?Sized,
{
    let layout = layouts(&*drawing, config, log)
        .into_iter()
        .find(|l| l.table == table)
        .ok_or_else(|| StoreError::NotFound(format!("table {table}")))?;
    Ok(reverse::adopt(drawing, &layout, config, log))
}

/// Scan and write the flat-record file. Returns the record count.
pub fn export_flat<D, W>(drawing: &D, out: W, config: &EngineConfig, log: &mut CommandLog) -> Result<usize>
where
    D: InstanceStore + TableStore + ?Sized,
    W: Write,
{
    let (set, _) = aggregate::scan(drawing, config, log);
    let count = flatfile::export(&set, out)?;
    log.info(format!("exported {count} record(s)"));
    Ok(count)
}

/// Parse a flat-record file and apply it to the drawing.
///
/// A rejected file leaves the drawing untouched.
pub fn import_flat<D, R>(
    drawing: &mut D,
    input: R,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Result<ImportApplyReport>
where
    D: InstanceStore + TableStore + ?Sized,
    R: Read,
{
    let records = flatfile::import(input).map_err(|e| {
        log.error(format!("import rejected: {e}"));
        e
    })?;
    let (mut set, _) = aggregate::scan(&*drawing, config, log);
    flatfile::apply_import(drawing, &mut set, records, config, log)
}

/// Whether an error means the flat-record file itself was rejected.
pub fn is_import_rejection(err: &ReconError) -> bool {
    matches!(
        err,
        ReconError::BlankKey { .. } | ReconError::DuplicateKey { .. } | ReconError::Csv(_)
    )
}
