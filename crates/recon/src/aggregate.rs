use std::collections::BTreeMap;

use serde::Serialize;

use crate::classify::{read_layout, HeaderMatcher, TableLayout, TableShape};
use crate::config::EngineConfig;
use crate::key::CrossingKey;
use crate::logctx::CommandLog;
use crate::matcher::{KeyMatch, RecordIndex};
use crate::model::{
    CanonicalSet, CrossingRecord, Field, InstanceContext, InstanceId, LatLongSource, RecordValues,
    ReportMeta,
};
use crate::rows::read_rows;
use crate::store::{read_values, InstanceStore, TableStore};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One physical instance as seen by a scan.
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: InstanceId,
    pub space: String,
    pub in_table: bool,
    pub values: RecordValues,
    /// Persisted marker from an earlier accepted resolution.
    pub marked_canonical: bool,
}

/// A coordinate-bearing row offered for enrichment.
#[derive(Debug, Clone)]
pub struct CoordinateRow {
    pub source: LatLongSource,
    pub values: RecordValues,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregateStats {
    pub instances: usize,
    pub ignored_instances: usize,
    pub blank_keys: usize,
    pub records: usize,
    pub duplicate_keys: usize,
    pub coordinate_rows: usize,
    pub coordinate_rows_attached: usize,
    pub coordinate_rows_unattached: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub meta: ReportMeta,
    pub stats: AggregateStats,
    pub tables: Vec<TableLayout>,
    pub records: Vec<CrossingRecord>,
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Merge instance observations into one record per key.
///
/// Canonical instance, in order of preference: a vote-eligible instance
/// carrying the persisted marker, the first eligible instance in the primary
/// space, the first eligible instance. Ignored instances never become
/// canonical. The record takes the canonical instance's values (or the first
/// observed, if none is eligible); blank coordinates are then filled from
/// the other instances in discovery order.
pub fn aggregate(
    observations: Vec<Observation>,
    config: &EngineConfig,
    stats: &mut AggregateStats,
) -> CanonicalSet {
    let mut groups: BTreeMap<CrossingKey, Vec<Observation>> = BTreeMap::new();

    for obs in observations {
        stats.instances += 1;
        match obs.values.key() {
            Some(key) => groups.entry(key).or_default().push(obs),
            None => stats.blank_keys += 1,
        }
    }

    let mut set = CanonicalSet::new();
    for (_key, members) in groups {
        let eligible = |o: &&Observation| !o.in_table && !config.is_ignored_space(&o.space);

        let canonical = members
            .iter()
            .filter(eligible)
            .find(|o| o.marked_canonical)
            .or_else(|| {
                members
                    .iter()
                    .filter(eligible)
                    .find(|o| config.is_primary_space(&o.space))
            })
            .or_else(|| members.iter().find(eligible));

        let Some(source) = canonical.or_else(|| members.first()) else {
            continue;
        };

        let mut record = CrossingRecord::new(source.values.clone());
        record.canonical_instance = canonical.map(|o| o.id);
        for other in &members {
            fill_blank_coordinates(&mut record.values, &other.values);
        }

        if members.iter().filter(eligible).count() > 1 {
            stats.duplicate_keys += 1;
        }

        for obs in members {
            let ignore = obs.in_table || config.is_ignored_space(&obs.space);
            if ignore {
                stats.ignored_instances += 1;
            }
            record.all_instances.push(obs.id);
            set.insert_context(InstanceContext {
                id: obs.id,
                space: obs.space,
                in_table: obs.in_table,
                values: obs.values,
                ignore_for_duplicates: ignore,
            });
        }
        set.insert(record);
    }

    stats.records = set.len();
    set
}

/// Fill only the blank coordinate fields of `target`.
fn fill_blank_coordinates(target: &mut RecordValues, from: &RecordValues) {
    for field in Field::COORDS {
        if target.get(field).trim().is_empty() && !from.get(field).trim().is_empty() {
            target.set(field, from.get(field));
        }
    }
}

/// Attach coordinate rows to records and fill blank Lat/Long/Zone.
///
/// Strictly additive: a value already present is never overwritten. Rows
/// that do not match exactly one record are left unattached.
pub fn enrich_coordinates(
    set: &mut CanonicalSet,
    rows: Vec<CoordinateRow>,
    stats: &mut AggregateStats,
    log: &mut CommandLog,
) {
    let index = RecordIndex::build(set);
    for row in rows {
        stats.coordinate_rows += 1;
        match index.resolve_coordinate_row(set, &row.values) {
            KeyMatch::Unique(key, stage) => {
                if let Some(record) = set.get_mut(&key) {
                    log.debug(format!(
                        "{} attached to {} ({stage:?})",
                        row.source.label, record.values.crossing
                    ));
                    fill_blank_coordinates(&mut record.values, &row.values);
                    record.lat_long_sources.push(row.source);
                    stats.coordinate_rows_attached += 1;
                }
            }
            KeyMatch::Ambiguous(keys) => {
                stats.coordinate_rows_unattached += 1;
                log.warn(format!(
                    "{}: key '{}' matches {} records, left unattached",
                    row.source.label,
                    row.values.crossing,
                    keys.len()
                ));
            }
            KeyMatch::None => {
                stats.coordinate_rows_unattached += 1;
                log.debug(format!(
                    "{}: no record for '{}'",
                    row.source.label, row.values.crossing
                ));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scan over stores
// ---------------------------------------------------------------------------

/// Read every tracked instance from the store.
pub fn observe_instances<S: InstanceStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
) -> Vec<Observation> {
    store
        .instances(&config.block_name)
        .into_iter()
        .map(|r| Observation {
            values: read_values(store, r.id, config),
            marked_canonical: store.is_canonical(r.id),
            id: r.id,
            space: r.space,
            in_table: r.in_table,
        })
        .collect()
}

/// Classify every table; Unknown tables are logged and skipped.
pub fn layouts<S: TableStore + ?Sized>(
    store: &S,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Vec<TableLayout> {
    let matcher = HeaderMatcher::from_config(config);
    let mut out = Vec::new();
    for table in store.tables() {
        let layout = read_layout(store, table, &matcher, config, log);
        if layout.shape == TableShape::Unknown {
            log.debug(format!("table {table}: shape unknown, skipped"));
        }
        out.push(layout);
    }
    out
}

/// Coordinate rows of every LAT/LONG table, labelled with their origin.
pub fn coordinate_rows<S: TableStore + ?Sized>(
    store: &S,
    layouts: &[TableLayout],
    config: &EngineConfig,
    log: &mut CommandLog,
) -> Vec<CoordinateRow> {
    let mut out = Vec::new();
    for layout in layouts.iter().filter(|l| l.shape == TableShape::LatLong) {
        let space = store.table_space(layout.table).unwrap_or_default();
        for row in read_rows(store, layout, config, log) {
            if row.key_text.is_empty() {
                continue;
            }
            out.push(CoordinateRow {
                source: LatLongSource {
                    table: layout.table,
                    row: row.row,
                    label: format!("{space} table {} row {}", layout.table, row.row + 1),
                    lat: row.values.lat.clone(),
                    long: row.values.long.clone(),
                    zone: row.values.zone.clone(),
                    dwg_ref: row.values.dwg_ref.clone(),
                },
                values: row.values,
            });
        }
    }
    out
}

/// Build the canonical record set from the drawing. Read-only.
pub fn scan<D>(drawing: &D, config: &EngineConfig, log: &mut CommandLog) -> (CanonicalSet, ScanReport)
where
    D: InstanceStore + TableStore + ?Sized,
{
    let mut stats = AggregateStats::default();
    let observations = observe_instances(drawing, config);
    let mut set = aggregate(observations, config, &mut stats);

    let tables = layouts(drawing, config, log);
    let rows = coordinate_rows(drawing, &tables, config, log);
    enrich_coordinates(&mut set, rows, &mut stats, log);

    log.info(format!(
        "scanned {} instances into {} records ({} blank keys, {} duplicate keys)",
        stats.instances, stats.records, stats.blank_keys, stats.duplicate_keys
    ));

    let report = ScanReport {
        meta: log.meta(),
        stats,
        tables,
        records: set.records().map(|(_, r)| r.clone()).collect(),
    };
    (set, report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: u64, space: &str, crossing: &str, owner: &str) -> Observation {
        Observation {
            id: InstanceId(id),
            space: space.into(),
            in_table: false,
            values: RecordValues {
                crossing: crossing.into(),
                owner: owner.into(),
                ..RecordValues::default()
            },
            marked_canonical: false,
        }
    }

    fn run(observations: Vec<Observation>) -> CanonicalSet {
        let mut stats = AggregateStats::default();
        aggregate(observations, &EngineConfig::default(), &mut stats)
    }

    fn key(text: &str) -> CrossingKey {
        CrossingKey::from_text(text).unwrap()
    }

    #[test]
    fn one_record_per_key_primary_space_wins() {
        let set = run(vec![
            obs(2, "Layout1", "X4", "Acme Inc"),
            obs(1, "Model", "x04", "Acme"),
        ]);
        assert_eq!(set.len(), 1);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.canonical_instance, Some(InstanceId(1)));
        assert_eq!(r.values.owner, "Acme");
        assert_eq!(r.all_instances, vec![InstanceId(2), InstanceId(1)]);
    }

    #[test]
    fn first_encountered_when_no_primary_instance() {
        let set = run(vec![obs(5, "Layout1", "X4", "B"), obs(6, "Layout2", "X4", "C")]);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.canonical_instance, Some(InstanceId(5)));
        assert_eq!(r.values.owner, "B");
    }

    #[test]
    fn blank_keys_dropped() {
        let mut stats = AggregateStats::default();
        let set = aggregate(
            vec![obs(1, "Model", " ", "A"), obs(2, "Model", "X1", "B")],
            &EngineConfig::default(),
            &mut stats,
        );
        assert_eq!(set.len(), 1);
        assert_eq!(stats.blank_keys, 1);
    }

    #[test]
    fn marked_instance_beats_default() {
        let mut b = obs(2, "Layout1", "X4", "Acme Inc");
        b.marked_canonical = true;
        let set = run(vec![obs(1, "Model", "X4", "Acme"), b]);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.canonical_instance, Some(InstanceId(2)));
        assert_eq!(r.values.owner, "Acme Inc");
    }

    #[test]
    fn table_embedded_instance_never_canonical() {
        let mut embedded = obs(1, "Model", "X4", "From table");
        embedded.in_table = true;
        embedded.marked_canonical = true;
        let set = run(vec![embedded, obs(2, "Layout1", "X4", "Acme")]);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.canonical_instance, Some(InstanceId(2)));
        assert!(set.context(InstanceId(1)).unwrap().ignore_for_duplicates);
        assert!(!set.context(InstanceId(2)).unwrap().ignore_for_duplicates);
    }

    #[test]
    fn only_ignored_instances_leave_canonical_unset() {
        let mut embedded = obs(1, "Model", "X4", "Acme");
        embedded.in_table = true;
        let set = run(vec![embedded]);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.canonical_instance, None);
        assert_eq!(r.values.owner, "Acme");
    }

    #[test]
    fn coordinates_filled_from_other_instances() {
        let mut a = obs(1, "Model", "X4", "Acme");
        a.values.lat = "51.5".into();
        let mut b = obs(2, "Layout1", "X4", "Acme");
        b.values.lat = "99".into();
        b.values.long = "-0.12".into();
        let set = run(vec![a, b]);
        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.values.lat, "51.5");
        assert_eq!(r.values.long, "-0.12");
    }

    #[test]
    fn enrichment_is_additive() {
        let mut a = obs(1, "Model", "X4", "Acme");
        a.values.lat = "51.5".into();
        let mut set = run(vec![a]);

        let row = CoordinateRow {
            source: LatLongSource {
                table: crate::model::TableId(9),
                row: 2,
                label: "Model table T9 row 3".into(),
                lat: "10".into(),
                long: "20".into(),
                zone: "".into(),
                dwg_ref: "".into(),
            },
            values: RecordValues {
                crossing: "X04".into(),
                lat: "10".into(),
                long: "20".into(),
                ..RecordValues::default()
            },
        };
        let mut stats = AggregateStats::default();
        let mut log = CommandLog::with_correlation_id("test", "t");
        enrich_coordinates(&mut set, vec![row], &mut stats, &mut log);

        let r = set.get(&key("X4")).unwrap();
        assert_eq!(r.values.lat, "51.5");
        assert_eq!(r.values.long, "20");
        assert_eq!(r.lat_long_sources.len(), 1);
        assert_eq!(stats.coordinate_rows_attached, 1);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let input = vec![
            obs(1, "Model", "X4", "Acme"),
            obs(2, "Layout1", "X4", "Acme Inc"),
            obs(3, "Model", "X10", "Other"),
        ];
        assert_eq!(run(input.clone()), run(input));
    }
}
