use std::collections::HashMap;

use serde::Serialize;

use crate::key::{exact_key, lookup_key, CrossingKey};
use crate::model::{CanonicalSet, RecordValues};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Which stage of the cascade produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    Exact,
    Lookup,
    Comparator,
    Description,
    Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMatch {
    Unique(CrossingKey, MatchStage),
    /// More than one record survived; callers must not guess.
    Ambiguous(Vec<CrossingKey>),
    None,
}

impl KeyMatch {
    pub fn key(&self) -> Option<&CrossingKey> {
        match self {
            Self::Unique(key, _) => Some(key),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization shared by matchers and divergence signatures
// ---------------------------------------------------------------------------

/// Whitespace-collapsed, upper-cased text.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Numeric coordinates compare at 6 decimals; anything else as text.
pub fn normalize_coord(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches('°');
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => format!("{v:.6}"),
        _ => normalize_text(trimmed).replace(' ', ""),
    }
}

/// Normalized (lat, long, zone): the divergence signature of coordinate
/// duplicates.
pub fn coord_signature(values: &RecordValues) -> (String, String, String) {
    (
        normalize_coord(&values.lat),
        normalize_coord(&values.long),
        normalize_text(&values.zone),
    )
}

/// Coordinate signature plus DWG_REF, used as the last tie-break.
fn full_signature(values: &RecordValues) -> (String, String, String, String) {
    let (lat, long, zone) = coord_signature(values);
    (lat, long, zone, normalize_text(&values.dwg_ref))
}

// ---------------------------------------------------------------------------
// Record index
// ---------------------------------------------------------------------------

/// Secondary indices over a canonical set for matching foreign row keys.
#[derive(Debug, Default)]
pub struct RecordIndex {
    exact: HashMap<String, Vec<CrossingKey>>,
    lookup: HashMap<String, Vec<CrossingKey>>,
}

impl RecordIndex {
    pub fn build(set: &CanonicalSet) -> Self {
        let mut index = Self::default();
        for (key, record) in set.records() {
            index
                .exact
                .entry(exact_key(&record.values.crossing))
                .or_default()
                .push(key.clone());
            index
                .lookup
                .entry(lookup_key(&record.values.crossing))
                .or_default()
                .push(key.clone());
        }
        index
    }

    /// Candidates from the first key stage that yields any:
    /// exact text, loose lookup key, then key comparator.
    pub fn candidates(&self, set: &CanonicalSet, text: &str) -> Option<(MatchStage, Vec<CrossingKey>)> {
        if text.trim().is_empty() {
            return None;
        }
        if let Some(keys) = self.exact.get(&exact_key(text)) {
            return Some((MatchStage::Exact, keys.clone()));
        }
        let loose = lookup_key(text);
        if !loose.is_empty() {
            if let Some(keys) = self.lookup.get(&loose) {
                return Some((MatchStage::Lookup, keys.clone()));
            }
        }
        let key = CrossingKey::from_text(text)?;
        set.get(&key).map(|_| (MatchStage::Comparator, vec![key]))
    }

    /// Match a row key to a record. Several candidates means no match.
    pub fn resolve(&self, set: &CanonicalSet, text: &str) -> KeyMatch {
        match self.candidates(set, text) {
            Some((stage, mut keys)) => {
                if keys.len() == 1 {
                    KeyMatch::Unique(keys.remove(0), stage)
                } else {
                    KeyMatch::Ambiguous(keys)
                }
            }
            None => KeyMatch::None,
        }
    }

    /// Match a coordinate row to a record.
    ///
    /// Key stages first. If several records remain, the row's description
    /// must single one out; if none share it, the (lat, long, zone, dwg_ref)
    /// signature must. Anything else leaves the row unattached.
    pub fn resolve_coordinate_row(&self, set: &CanonicalSet, row: &RecordValues) -> KeyMatch {
        let (stage, keys) = match self.candidates(set, &row.crossing) {
            Some(found) => found,
            None => return KeyMatch::None,
        };
        if keys.len() == 1 {
            return KeyMatch::Unique(keys[0].clone(), stage);
        }

        let want_desc = normalize_text(&row.description);
        if !want_desc.is_empty() {
            let by_desc: Vec<&CrossingKey> = keys
                .iter()
                .filter(|k| {
                    set.get(k)
                        .is_some_and(|r| normalize_text(&r.values.description) == want_desc)
                })
                .collect();
            match by_desc.len() {
                1 => return KeyMatch::Unique(by_desc[0].clone(), MatchStage::Description),
                0 => {}
                _ => return KeyMatch::Ambiguous(by_desc.into_iter().cloned().collect()),
            }
        }

        let want_sig = full_signature(row);
        let by_sig: Vec<&CrossingKey> = keys
            .iter()
            .filter(|k| set.get(k).is_some_and(|r| full_signature(&r.values) == want_sig))
            .collect();
        if by_sig.len() == 1 {
            KeyMatch::Unique(by_sig[0].clone(), MatchStage::Signature)
        } else {
            KeyMatch::Ambiguous(keys)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CrossingRecord;

    fn set_of(rows: &[(&str, &str, &str)]) -> CanonicalSet {
        let mut set = CanonicalSet::new();
        for (crossing, desc, lat) in rows {
            set.insert(CrossingRecord::new(RecordValues {
                crossing: crossing.to_string(),
                description: desc.to_string(),
                lat: lat.to_string(),
                ..RecordValues::default()
            }));
        }
        set
    }

    fn row(crossing: &str, desc: &str, lat: &str) -> RecordValues {
        RecordValues {
            crossing: crossing.into(),
            description: desc.into(),
            lat: lat.into(),
            ..RecordValues::default()
        }
    }

    #[test]
    fn exact_then_lookup_then_comparator() {
        let set = set_of(&[("X4", "", ""), ("X10", "", "")]);
        let index = RecordIndex::build(&set);

        assert!(matches!(index.resolve(&set, " x4 "), KeyMatch::Unique(_, MatchStage::Exact)));
        assert!(matches!(index.resolve(&set, "X-04"), KeyMatch::Unique(_, MatchStage::Lookup)));
        // Digits split around the suffix: only the parsed key agrees
        assert!(matches!(index.resolve(&set, "1 X0"), KeyMatch::Unique(_, MatchStage::Comparator)));
        assert_eq!(index.resolve(&set, "X5"), KeyMatch::None);
        assert_eq!(index.resolve(&set, "  "), KeyMatch::None);
    }

    #[test]
    fn lookup_collision_is_ambiguous() {
        let set = set_of(&[("X4", "", ""), ("X-4", "", "")]);
        let index = RecordIndex::build(&set);
        assert!(matches!(index.resolve(&set, "X04"), KeyMatch::Ambiguous(keys) if keys.len() == 2));
    }

    #[test]
    fn coordinate_row_tie_break_by_description() {
        let set = set_of(&[("X4", "Gas main", ""), ("X-4", "Water line", "")]);
        let index = RecordIndex::build(&set);
        let m = index.resolve_coordinate_row(&set, &row("X04", "water  LINE", ""));
        assert_eq!(
            m,
            KeyMatch::Unique(CrossingKey::from_text("X-4").unwrap(), MatchStage::Description)
        );
    }

    #[test]
    fn coordinate_row_tie_break_by_signature() {
        let set = set_of(&[("X4", "", "51.5"), ("X-4", "", "52.0")]);
        let index = RecordIndex::build(&set);
        let m = index.resolve_coordinate_row(&set, &row("X04", "Unrelated", "52.000000"));
        assert_eq!(
            m,
            KeyMatch::Unique(CrossingKey::from_text("X-4").unwrap(), MatchStage::Signature)
        );
    }

    #[test]
    fn coordinate_row_left_unattached_when_still_ambiguous() {
        let set = set_of(&[("X4", "Same", ""), ("X-4", "Same", "")]);
        let index = RecordIndex::build(&set);
        assert!(matches!(
            index.resolve_coordinate_row(&set, &row("X04", "same", "")),
            KeyMatch::Ambiguous(_)
        ));
        let set = set_of(&[("X4", "", "1"), ("X-4", "", "1")]);
        let index = RecordIndex::build(&set);
        assert!(matches!(
            index.resolve_coordinate_row(&set, &row("X04", "", "1")),
            KeyMatch::Ambiguous(_)
        ));
    }

    #[test]
    fn coord_normalization() {
        assert_eq!(normalize_coord(" 51.5 "), normalize_coord("51.500000"));
        assert_eq!(normalize_coord("51.5°"), normalize_coord("51.5"));
        assert_ne!(normalize_coord("51.5"), normalize_coord("51.6"));
        assert_eq!(normalize_coord("n 51 30"), "N5130");
    }
}
