use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::CrossingKey;

// ---------------------------------------------------------------------------
// Handles into the drawing
// ---------------------------------------------------------------------------

/// Opaque handle of one physical block instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub u64);

/// Opaque handle of one table entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// The eight scalar attributes of a crossing, in flat-file column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Crossing,
    Owner,
    Description,
    Location,
    DwgRef,
    Lat,
    Long,
    Zone,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Crossing,
        Field::Owner,
        Field::Description,
        Field::Location,
        Field::DwgRef,
        Field::Lat,
        Field::Long,
        Field::Zone,
    ];

    /// Fields stored as block attributes.
    pub const TEXT: [Field; 5] = [
        Field::Crossing,
        Field::Owner,
        Field::Description,
        Field::Location,
        Field::DwgRef,
    ];

    /// Fields stored in the instance side-channel, in side-channel order.
    pub const COORDS: [Field; 3] = [Field::Lat, Field::Long, Field::Zone];

    /// Flat-file header name.
    pub fn header(&self) -> &'static str {
        match self {
            Self::Crossing => "CROSSING",
            Self::Owner => "OWNER",
            Self::Description => "DESCRIPTION",
            Self::Location => "LOCATION",
            Self::DwgRef => "DWG_REF",
            Self::Lat => "LAT",
            Self::Long => "LONG",
            Self::Zone => "ZONE",
        }
    }

    pub fn is_coordinate(&self) -> bool {
        matches!(self, Self::Lat | Self::Long | Self::Zone)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// Text values of one crossing, from whatever representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValues {
    #[serde(default)]
    pub crossing: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub dwg_ref: String,
    #[serde(default)]
    pub lat: String,
    #[serde(default)]
    pub long: String,
    #[serde(default)]
    pub zone: String,
}

impl RecordValues {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Crossing => &self.crossing,
            Field::Owner => &self.owner,
            Field::Description => &self.description,
            Field::Location => &self.location,
            Field::DwgRef => &self.dwg_ref,
            Field::Lat => &self.lat,
            Field::Long => &self.long,
            Field::Zone => &self.zone,
        }
    }

    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        match field {
            Field::Crossing => self.crossing = value,
            Field::Owner => self.owner = value,
            Field::Description => self.description = value,
            Field::Location => self.location = value,
            Field::DwgRef => self.dwg_ref = value,
            Field::Lat => self.lat = value,
            Field::Long => self.long = value,
            Field::Zone => self.zone = value,
        }
    }

    pub fn key(&self) -> Option<CrossingKey> {
        CrossingKey::from_text(&self.crossing)
    }

    pub fn has_coordinates(&self) -> bool {
        Field::COORDS.iter().any(|f| !self.get(*f).trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Canonical record
// ---------------------------------------------------------------------------

/// A coordinate row a record was enriched from, kept so resolved values can
/// be written back to the exact origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatLongSource {
    pub table: TableId,
    pub row: usize,
    pub label: String,
    pub lat: String,
    pub long: String,
    pub zone: String,
    pub dwg_ref: String,
}

/// One logical crossing. Its [`CrossingKey`] is always derived from
/// `values.crossing`, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossingRecord {
    #[serde(flatten)]
    pub values: RecordValues,
    #[serde(default)]
    pub all_instances: Vec<InstanceId>,
    #[serde(default)]
    pub canonical_instance: Option<InstanceId>,
    #[serde(default)]
    pub lat_long_sources: Vec<LatLongSource>,
}

impl CrossingRecord {
    pub fn new(values: RecordValues) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    pub fn key(&self) -> Option<CrossingKey> {
        self.values.key()
    }
}

/// Read-mostly projection of one physical instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceContext {
    pub id: InstanceId,
    pub space: String,
    pub in_table: bool,
    pub values: RecordValues,
    /// Embedded in a table cell or living in an ignored space: never votes
    /// in duplicate resolution or canonical selection.
    pub ignore_for_duplicates: bool,
}

// ---------------------------------------------------------------------------
// Canonical set
// ---------------------------------------------------------------------------

/// All canonical records of one scan, plus the instance projections they
/// were built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalSet {
    records: BTreeMap<CrossingKey, CrossingRecord>,
    contexts: BTreeMap<InstanceId, InstanceContext>,
}

impl CanonicalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// File a record under its derived key. Blank keys are dropped; an
    /// existing record with the same key is replaced.
    pub fn insert(&mut self, record: CrossingRecord) -> Option<CrossingKey> {
        let key = record.key()?;
        self.records.insert(key.clone(), record);
        Some(key)
    }

    pub fn insert_context(&mut self, ctx: InstanceContext) {
        self.contexts.insert(ctx.id, ctx);
    }

    pub fn get(&self, key: &CrossingKey) -> Option<&CrossingRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &CrossingKey) -> Option<&mut CrossingRecord> {
        self.records.get_mut(key)
    }

    pub fn context(&self, id: InstanceId) -> Option<&InstanceContext> {
        self.contexts.get(&id)
    }

    pub fn context_mut(&mut self, id: InstanceId) -> Option<&mut InstanceContext> {
        self.contexts.get_mut(&id)
    }

    /// Records in key order.
    pub fn records(&self) -> impl Iterator<Item = (&CrossingKey, &CrossingRecord)> {
        self.records.iter()
    }

    pub fn contexts(&self) -> impl Iterator<Item = &InstanceContext> {
        self.contexts.values()
    }

    /// Contexts of every instance filed under `key`, in discovery order.
    pub fn contexts_for(&self, key: &CrossingKey) -> Vec<&InstanceContext> {
        self.records
            .get(key)
            .map(|r| {
                r.all_instances
                    .iter()
                    .filter_map(|id| self.contexts.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Change a record's display text and re-file it under the new key.
    ///
    /// Renaming onto a key that is already taken merges into the existing
    /// record: its scalars win, instance lists and coordinate sources are
    /// appended. Renaming to blank text is refused. Returns the key the
    /// record ends up under.
    pub fn rename(&mut self, key: &CrossingKey, new_crossing: &str) -> Option<CrossingKey> {
        let new_key = CrossingKey::from_text(new_crossing)?;
        let mut record = self.records.remove(key)?;
        record.values.crossing = new_crossing.trim().to_string();

        for id in &record.all_instances {
            if let Some(ctx) = self.contexts.get_mut(id) {
                ctx.values.crossing = record.values.crossing.clone();
            }
        }

        match self.records.get_mut(&new_key) {
            Some(survivor) => {
                for id in record.all_instances {
                    if !survivor.all_instances.contains(&id) {
                        survivor.all_instances.push(id);
                    }
                }
                survivor.lat_long_sources.extend(record.lat_long_sources);
                if survivor.canonical_instance.is_none() {
                    survivor.canonical_instance = record.canonical_instance;
                }
            }
            None => {
                self.records.insert(new_key.clone(), record);
            }
        }
        Some(new_key)
    }
}

// ---------------------------------------------------------------------------
// Report metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub command: String,
    pub correlation_id: String,
    pub engine_version: String,
    pub run_at: String,
}
