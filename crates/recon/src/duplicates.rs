//! Duplicate detection and resolution.
//!
//! One resolution pass runs: collect groups → filter → present → decide →
//! propagate → write back. Nothing is mutated before the decision is
//! accepted, so a cancelled pass leaves records, instances and tables as
//! they were. After acceptance, write-back is best-effort per instance and
//! per table.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use thiserror::Error;

use crate::aggregate::layouts;
use crate::classify::{TableLayout, TableShape};
use crate::config::EngineConfig;
use crate::key::CrossingKey;
use crate::logctx::CommandLog;
use crate::matcher::{coord_signature, KeyMatch, RecordIndex};
use crate::model::{
    CanonicalSet, CrossingRecord, Field, InstanceContext, InstanceId, RecordValues, ReportMeta,
    TableId,
};
use crate::rows::read_row;
use crate::store::{regenerate_table, write_values, InstanceStore, TableStore};

// ---------------------------------------------------------------------------
// Candidates and groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CandidateId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    /// Several instances share a key. Multiplicity alone flags the group.
    Instance,
    /// Coordinate sources of a key disagree on (lat, long, zone).
    LatLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum CandidateOrigin {
    Instance { id: InstanceId },
    TableRow { table: TableId, row: usize },
}

/// Query-only view of one competing representation.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCandidate {
    pub id: CandidateId,
    pub origin: CandidateOrigin,
    pub source: String,
    pub values: RecordValues,
    pub is_canonical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub id: GroupId,
    pub key: CrossingKey,
    pub crossing: String,
    pub kind: DuplicateKind,
    candidates: Vec<DuplicateCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    #[error("no duplicate group {0:?}")]
    UnknownGroup(GroupId),
    #[error("group {group:?} has no candidate {candidate:?}")]
    UnknownCandidate { group: GroupId, candidate: CandidateId },
}

impl DuplicateGroup {
    pub fn candidates(&self) -> &[DuplicateCandidate] {
        &self.candidates
    }

    pub fn selected(&self) -> Option<&DuplicateCandidate> {
        let mut it = self.candidates.iter().filter(|c| c.is_canonical);
        match (it.next(), it.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// Mark one candidate canonical and clear its siblings.
    pub fn select(&mut self, candidate: CandidateId) -> Result<(), SelectError> {
        if !self.candidates.iter().any(|c| c.id == candidate) {
            return Err(SelectError::UnknownCandidate {
                group: self.id,
                candidate,
            });
        }
        for c in &mut self.candidates {
            c.is_canonical = c.id == candidate;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        for c in &mut self.candidates {
            c.is_canonical = false;
        }
    }

    fn selection_count(&self) -> usize {
        self.candidates.iter().filter(|c| c.is_canonical).count()
    }
}

// ---------------------------------------------------------------------------
// Session + decision contract
// ---------------------------------------------------------------------------

/// Transient state of one resolution pass, handed to the deciding actor.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionSession {
    kind: DuplicateKind,
    groups: Vec<DuplicateGroup>,
}

impl ResolutionSession {
    pub fn new(kind: DuplicateKind, groups: Vec<DuplicateGroup>) -> Self {
        Self { kind, groups }
    }

    pub fn kind(&self) -> DuplicateKind {
        self.kind
    }

    pub fn groups(&self) -> &[DuplicateGroup] {
        &self.groups
    }

    pub fn group(&self, id: GroupId) -> Option<&DuplicateGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// The only way to change a selection: one canonical per group.
    pub fn select(
        &mut self,
        group: GroupId,
        candidate: CandidateId,
    ) -> Result<&DuplicateGroup, SelectError> {
        let g = self
            .groups
            .iter_mut()
            .find(|g| g.id == group)
            .ok_or(SelectError::UnknownGroup(group))?;
        g.select(candidate)?;
        Ok(g)
    }

    pub fn clear(&mut self, group: GroupId) -> Result<(), SelectError> {
        self.groups
            .iter_mut()
            .find(|g| g.id == group)
            .ok_or(SelectError::UnknownGroup(group))?
            .clear();
        Ok(())
    }

    /// Groups that do not have exactly one selection.
    pub fn invalid_groups(&self) -> Vec<GroupId> {
        self.groups
            .iter()
            .filter(|g| g.selection_count() != 1)
            .map(|g| g.id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Cancel,
}

/// External actor choosing one canonical member per group.
pub trait ResolutionUi {
    fn decide(&mut self, session: &mut ResolutionSession) -> Decision;

    /// Called before re-prompting when an accepted session was invalid.
    fn rejected(&mut self, _invalid: &[GroupId]) {}
}

// ---------------------------------------------------------------------------
// Collect + filter
// ---------------------------------------------------------------------------

fn instance_label(ctx: &InstanceContext) -> String {
    format!("{} instance {}", ctx.space, ctx.id)
}

/// Keys carried by more than one vote-eligible instance.
pub fn instance_groups(set: &CanonicalSet) -> Vec<DuplicateGroup> {
    let mut groups = Vec::new();
    for (key, record) in set.records() {
        let members: Vec<&InstanceContext> = set
            .contexts_for(key)
            .into_iter()
            .filter(|c| !c.ignore_for_duplicates)
            .collect();
        if members.len() < 2 {
            continue;
        }
        let candidates = members
            .iter()
            .enumerate()
            .map(|(i, ctx)| DuplicateCandidate {
                id: CandidateId(i),
                origin: CandidateOrigin::Instance { id: ctx.id },
                source: instance_label(ctx),
                values: ctx.values.clone(),
                is_canonical: record.canonical_instance == Some(ctx.id),
            })
            .collect();
        groups.push(DuplicateGroup {
            id: GroupId(groups.len()),
            key: key.clone(),
            crossing: record.values.crossing.clone(),
            kind: DuplicateKind::Instance,
            candidates,
        });
    }
    groups
}

/// Keys whose coordinate sources disagree after normalization.
///
/// Candidates are the recorded LAT/LONG rows plus every vote-eligible
/// instance carrying side-channel coordinates. Groups whose members share a
/// single (lat, long, zone) signature need no decision and are dropped.
pub fn lat_long_groups(set: &CanonicalSet) -> Vec<DuplicateGroup> {
    let mut groups = Vec::new();
    for (key, record) in set.records() {
        let mut candidates: Vec<DuplicateCandidate> = Vec::new();
        for src in &record.lat_long_sources {
            let mut values = record.values.clone();
            values.lat = src.lat.clone();
            values.long = src.long.clone();
            values.zone = src.zone.clone();
            values.dwg_ref = src.dwg_ref.clone();
            candidates.push(DuplicateCandidate {
                id: CandidateId(candidates.len()),
                origin: CandidateOrigin::TableRow {
                    table: src.table,
                    row: src.row,
                },
                source: src.label.clone(),
                values,
                is_canonical: false,
            });
        }
        for ctx in set.contexts_for(key) {
            if ctx.ignore_for_duplicates || !ctx.values.has_coordinates() {
                continue;
            }
            candidates.push(DuplicateCandidate {
                id: CandidateId(candidates.len()),
                origin: CandidateOrigin::Instance { id: ctx.id },
                source: instance_label(ctx),
                values: ctx.values.clone(),
                is_canonical: false,
            });
        }

        let signatures: BTreeSet<_> = candidates.iter().map(|c| coord_signature(&c.values)).collect();
        if candidates.len() < 2 || signatures.len() < 2 {
            continue;
        }

        let current = coord_signature(&record.values);
        if let Some(c) = candidates
            .iter_mut()
            .find(|c| coord_signature(&c.values) == current)
        {
            c.is_canonical = true;
        }

        groups.push(DuplicateGroup {
            id: GroupId(groups.len()),
            key: key.clone(),
            crossing: record.values.crossing.clone(),
            kind: DuplicateKind::LatLong,
            candidates,
        });
    }
    groups
}

pub fn collect_groups(set: &CanonicalSet, kind: DuplicateKind) -> Vec<DuplicateGroup> {
    match kind {
        DuplicateKind::Instance => instance_groups(set),
        DuplicateKind::LatLong => lat_long_groups(set),
    }
}

// ---------------------------------------------------------------------------
// Propagate
// ---------------------------------------------------------------------------

/// The fields a chosen candidate imposes on every representation.
///
/// Instance choices carry all text attributes, plus coordinates when the
/// applied choice has any (see [`effective_choice`]). Coordinate choices carry lat, long and zone,
/// plus DWG_REF when the chosen source has one.
pub fn chosen_fields(kind: DuplicateKind, values: &RecordValues) -> Vec<Field> {
    let mut fields = Vec::new();
    if kind == DuplicateKind::Instance {
        fields.extend(Field::TEXT);
        if values.has_coordinates() {
            fields.extend(Field::COORDS);
        }
    } else {
        fields.extend(Field::COORDS);
        if !values.dwg_ref.trim().is_empty() {
            fields.push(Field::DwgRef);
        }
    }
    fields
}

/// The candidate as it is applied.
///
/// An instance choice without coordinates takes the record's resolved
/// tuple, else the first recorded source's, else the first instance
/// carrying one. Every representation then ends up with one tuple.
pub fn effective_choice(
    set: &CanonicalSet,
    key: &CrossingKey,
    kind: DuplicateKind,
    chosen: &DuplicateCandidate,
) -> DuplicateCandidate {
    let mut out = chosen.clone();
    if kind != DuplicateKind::Instance || chosen.values.has_coordinates() {
        return out;
    }
    let Some(record) = set.get(key) else {
        return out;
    };
    let tuple = if record.values.has_coordinates() {
        Some((&record.values.lat, &record.values.long, &record.values.zone))
    } else if let Some(src) = record.lat_long_sources.first() {
        Some((&src.lat, &src.long, &src.zone))
    } else {
        set.contexts_for(key)
            .into_iter()
            .find(|c| c.values.has_coordinates())
            .map(|c| (&c.values.lat, &c.values.long, &c.values.zone))
    };
    if let Some((lat, long, zone)) = tuple {
        out.values.lat = lat.clone();
        out.values.long = long.clone();
        out.values.zone = zone.clone();
    }
    out
}

/// Apply an accepted choice to the record, its coordinate sources and every
/// instance context of the key. All three end up holding identical values
/// for the chosen fields. Only instance choices move the canonical instance.
pub fn propagate(
    set: &mut CanonicalSet,
    key: &CrossingKey,
    kind: DuplicateKind,
    chosen: &DuplicateCandidate,
    fields: &[Field],
) -> Option<Vec<InstanceId>> {
    let record = set.get_mut(key)?;
    for field in fields {
        record.values.set(*field, chosen.values.get(*field));
    }
    for src in &mut record.lat_long_sources {
        for field in fields {
            match field {
                Field::Lat => src.lat = chosen.values.lat.clone(),
                Field::Long => src.long = chosen.values.long.clone(),
                Field::Zone => src.zone = chosen.values.zone.clone(),
                Field::DwgRef => src.dwg_ref = chosen.values.dwg_ref.clone(),
                _ => {}
            }
        }
    }
    if let (DuplicateKind::Instance, CandidateOrigin::Instance { id }) = (kind, chosen.origin) {
        record.canonical_instance = Some(id);
    }
    let instances = record.all_instances.clone();

    for id in &instances {
        if let Some(ctx) = set.context_mut(*id) {
            for field in fields {
                ctx.values.set(*field, chosen.values.get(*field));
            }
        }
    }
    Some(instances)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AcceptedChoice {
    pub crossing: String,
    pub source: String,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TableWriteBack {
    pub table: TableId,
    pub rows_written: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolutionReport {
    pub meta: ReportMeta,
    pub kind: DuplicateKind,
    pub groups: usize,
    pub cancelled: bool,
    pub decision_rounds: usize,
    pub accepted: Vec<AcceptedChoice>,
    pub instance_write_failures: usize,
    pub tables: Vec<TableWriteBack>,
}

// ---------------------------------------------------------------------------
// Resolution pass
// ---------------------------------------------------------------------------

/// Run one resolution pass of `kind` over a scanned set.
///
/// The drawing is borrowed exclusively for the whole pass, including the
/// time the decision is pending.
pub fn resolve<D, U>(
    drawing: &mut D,
    set: &mut CanonicalSet,
    kind: DuplicateKind,
    ui: &mut U,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> ResolutionReport
where
    D: InstanceStore + TableStore + ?Sized,
    U: ResolutionUi + ?Sized,
{
    let groups = collect_groups(set, kind);
    let mut report = ResolutionReport {
        meta: log.meta(),
        kind,
        groups: groups.len(),
        cancelled: false,
        decision_rounds: 0,
        accepted: Vec::new(),
        instance_write_failures: 0,
        tables: Vec::new(),
    };
    if groups.is_empty() {
        log.info(format!("no {kind:?} duplicates to resolve"));
        return report;
    }
    log.info(format!("{} {kind:?} duplicate group(s) presented", groups.len()));

    let mut session = ResolutionSession::new(kind, groups);
    let mut accepted = false;
    while report.decision_rounds < config.max_decision_rounds {
        report.decision_rounds += 1;
        match ui.decide(&mut session) {
            Decision::Cancel => break,
            Decision::Accept => {
                let invalid = session.invalid_groups();
                if invalid.is_empty() {
                    accepted = true;
                    break;
                }
                log.warn(format!(
                    "{} group(s) without exactly one selection, re-prompting",
                    invalid.len()
                ));
                ui.rejected(&invalid);
            }
        }
    }
    if !accepted {
        report.cancelled = true;
        log.info("resolution cancelled, nothing applied");
        return report;
    }

    // Propagate in memory first; write-back failures cannot undo this.
    let mut touched: Vec<(CrossingKey, Vec<Field>, Vec<InstanceId>, Option<InstanceId>)> =
        Vec::new();
    for group in session.groups() {
        let Some(chosen) = group.selected() else {
            continue;
        };
        let chosen = effective_choice(set, &group.key, kind, chosen);
        let fields = chosen_fields(kind, &chosen.values);
        if let Some(instances) = propagate(set, &group.key, kind, &chosen, &fields) {
            let chosen_instance = match chosen.origin {
                CandidateOrigin::Instance { id } if kind == DuplicateKind::Instance => Some(id),
                _ => None,
            };
            report.accepted.push(AcceptedChoice {
                crossing: group.crossing.clone(),
                source: chosen.source.clone(),
                fields: fields.clone(),
            });
            touched.push((group.key.clone(), fields, instances, chosen_instance));
        }
    }

    for (key, fields, instances, chosen_instance) in &touched {
        let Some(record) = set.get(key) else {
            continue;
        };
        report.instance_write_failures +=
            write_back_instances(drawing, record, instances, fields, *chosen_instance, config, log);
    }

    report.tables = write_back_tables(drawing, set, &touched_coordinate_keys(&touched), config, log);
    log.info(format!(
        "accepted {} choice(s), {} instance write failure(s)",
        report.accepted.len(),
        report.instance_write_failures
    ));
    report
}

fn touched_coordinate_keys(
    touched: &[(CrossingKey, Vec<Field>, Vec<InstanceId>, Option<InstanceId>)],
) -> Vec<(CrossingKey, Vec<Field>)> {
    touched
        .iter()
        .filter(|(_, fields, _, _)| fields.iter().any(Field::is_coordinate))
        .map(|(key, fields, _, _)| {
            let table_fields = fields
                .iter()
                .copied()
                .filter(|f| f.is_coordinate() || *f == Field::DwgRef)
                .collect();
            (key.clone(), table_fields)
        })
        .collect()
}

/// Push chosen values into every instance of the key; move the persisted
/// canonical marker. Returns the number of failed writes.
fn write_back_instances<S: InstanceStore + ?Sized>(
    store: &mut S,
    record: &CrossingRecord,
    instances: &[InstanceId],
    fields: &[Field],
    chosen_instance: Option<InstanceId>,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> usize {
    let mut failures = 0;
    for id in instances {
        for (field, err) in write_values(store, *id, config, &record.values, fields) {
            failures += 1;
            log.warn(format!("instance {id}: cannot write {field}: {err}"));
        }
        if let Some(chosen) = chosen_instance {
            if let Err(err) = store.set_canonical(*id, *id == chosen) {
                failures += 1;
                log.warn(format!("instance {id}: cannot update canonical marker: {err}"));
            }
        }
    }
    failures
}

/// Write resolved coordinates to their origin rows, then sweep every other
/// LAT/LONG table for rows of the same key. Each table is its own failure
/// domain.
fn write_back_tables<S: TableStore + ?Sized>(
    store: &mut S,
    set: &CanonicalSet,
    keys: &[(CrossingKey, Vec<Field>)],
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Vec<TableWriteBack> {
    if keys.is_empty() {
        return Vec::new();
    }

    // (table, row) → (key, fields)
    let mut targets: BTreeMap<TableId, BTreeMap<usize, usize>> = BTreeMap::new();
    for (i, (key, _)) in keys.iter().enumerate() {
        if let Some(record) = set.get(key) {
            for src in &record.lat_long_sources {
                targets.entry(src.table).or_default().insert(src.row, i);
            }
        }
    }

    let all_layouts: Vec<TableLayout> = layouts(&*store, config, log);
    let index = RecordIndex::build(set);
    let wanted: HashSet<&CrossingKey> = keys.iter().map(|(k, _)| k).collect();
    for layout in all_layouts.iter().filter(|l| l.shape == TableShape::LatLong) {
        for row in layout.data_start..layout.rows {
            let values = read_row(&*store, layout, row, config, log).values;
            if let KeyMatch::Unique(key, _) = index.resolve_coordinate_row(set, &values) {
                if wanted.contains(&key) {
                    if let Some(i) = keys.iter().position(|(k, _)| *k == key) {
                        targets.entry(layout.table).or_default().entry(row).or_insert(i);
                    }
                }
            }
        }
    }

    let mut out = Vec::new();
    for (table, rows) in targets {
        let Some(layout) = all_layouts.iter().find(|l| l.table == table) else {
            log.warn(format!("table {table}: origin table no longer present"));
            continue;
        };
        let mut result = TableWriteBack {
            table,
            ..TableWriteBack::default()
        };
        for (row, i) in rows {
            let (key, fields) = &keys[i];
            let Some(record) = set.get(key) else {
                continue;
            };
            let mut row_ok = true;
            for field in fields {
                let Some(col) = layout.column_of(*field) else {
                    continue;
                };
                if let Err(err) = store.set_cell_text(table, row, col, record.values.get(*field)) {
                    row_ok = false;
                    result.failures += 1;
                    log.warn(format!("table {table}: cannot write ({row},{col}): {err}"));
                }
            }
            if row_ok {
                result.rows_written += 1;
            }
        }
        regenerate_table(store, table, log);
        out.push(result);
    }
    out
}
