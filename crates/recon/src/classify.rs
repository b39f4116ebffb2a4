use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::logctx::CommandLog;
use crate::model::{Field, TableId};
use crate::store::TableStore;

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableShape {
    Main,
    Page,
    LatLong,
    Unknown,
}

impl TableShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Page => "page",
            Self::LatLong => "lat_long",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a persisted tag. Unrecognized tags are not trusted.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match normalize_header(tag).as_str() {
            "MAIN" => Some(Self::Main),
            "PAGE" => Some(Self::Page),
            "LATLONG" => Some(Self::LatLong),
            _ => None,
        }
    }

    /// Column → field mapping for a table of this shape with `cols` columns.
    pub fn columns(&self, cols: usize) -> Vec<(usize, Field)> {
        let map: &[Field] = match self {
            Self::Main if cols >= 5 => &MAIN_FIELDS,
            Self::Page if cols >= 3 => &PAGE_FIELDS,
            Self::LatLong if cols >= 6 => &LATLONG6_FIELDS,
            Self::LatLong if cols >= 4 => &LATLONG4_FIELDS,
            _ => &[],
        };
        map.iter().copied().enumerate().collect()
    }
}

impl std::fmt::Display for TableShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const MAIN_FIELDS: [Field; 5] = [
    Field::Crossing,
    Field::Owner,
    Field::Description,
    Field::Location,
    Field::DwgRef,
];
const PAGE_FIELDS: [Field; 3] = [Field::Crossing, Field::Owner, Field::Description];
const LATLONG4_FIELDS: [Field; 4] = [Field::Crossing, Field::Description, Field::Lat, Field::Long];
const LATLONG6_FIELDS: [Field; 6] = [
    Field::Crossing,
    Field::Description,
    Field::Zone,
    Field::Lat,
    Field::Long,
    Field::DwgRef,
];

/// Placeholder in a header vector for "any DWG_REF spelling".
const DWG_REF_SLOT: &str = "\u{0}DWGREF";

const MAIN_HEADERS: [&str; 5] = ["XING", "OWNER", "DESCRIPTION", "LOCATION", DWG_REF_SLOT];
const PAGE_HEADERS: [&str; 3] = ["XING", "OWNER", "DESCRIPTION"];
const LATLONG4_HEADERS: [&str; 4] = ["ID", "DESCRIPTION", "LAT", "LONG"];
const LATLONG6_HEADERS: [&str; 6] = ["ID", "DESCRIPTION", "ZONE", "LAT", "LONG", DWG_REF_SLOT];

const DWG_REF_SYNONYMS: [&str; 8] = [
    "DWGREF",
    "DWGNO",
    "DWGNUMBER",
    "DWG",
    "DRAWINGREF",
    "DRAWINGNO",
    "DRAWINGNUMBER",
    "REFDWG",
];

// ---------------------------------------------------------------------------
// Header normalization
// ---------------------------------------------------------------------------

/// Strip MText formatting, `%%` control codes, punctuation and case.
///
/// `{\fArial|b1;XING}` → `XING`, `DWG\PREF` → `DWGREF`, `%%UOwner` → `OWNER`.
pub fn normalize_header(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let code = chars[i + 1];
                i += 2;
                match code {
                    // Codes with an argument terminated by ';'
                    'f' | 'F' | 'H' | 'h' | 'C' | 'c' | 'A' | 'a' | 'T' | 't' | 'Q' | 'q'
                    | 'W' | 'w' | 'p' => {
                        while i < chars.len() && chars[i] != ';' {
                            i += 1;
                        }
                        i += 1;
                    }
                    // Stacked fraction: keep its text
                    'S' => {}
                    // Escaped literal
                    '\\' | '{' | '}' => out.push(code),
                    // Toggles and paragraph breaks carry no text
                    _ => {}
                }
            }
            '%' if i + 2 < chars.len() && chars[i + 1] == '%' => {
                i += 3;
            }
            _ => {
                if c.is_alphanumeric() {
                    out.extend(c.to_uppercase());
                }
                i += 1;
            }
        }
    }
    out.retain(|c| c.is_alphanumeric());
    out
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Header vocabulary: the fixed vectors plus configured DWG_REF spellings.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    dwg_ref: Vec<String>,
}

impl Default for HeaderMatcher {
    fn default() -> Self {
        Self {
            dwg_ref: DWG_REF_SYNONYMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HeaderMatcher {
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut matcher = Self::default();
        for extra in &config.dwg_ref_headers {
            let norm = normalize_header(extra);
            if !norm.is_empty() && !matcher.dwg_ref.contains(&norm) {
                matcher.dwg_ref.push(norm);
            }
        }
        matcher
    }

    /// Shape implied by one header row. Trailing blank cells are ignored.
    pub fn classify_header<S: AsRef<str>>(&self, cells: &[S]) -> TableShape {
        let mut norm: Vec<String> = cells.iter().map(|c| normalize_header(c.as_ref())).collect();
        while norm.last().is_some_and(|c| c.is_empty()) {
            norm.pop();
        }

        if self.matches(&norm, &MAIN_HEADERS) {
            TableShape::Main
        } else if self.matches(&norm, &PAGE_HEADERS) {
            TableShape::Page
        } else if self.matches(&norm, &LATLONG4_HEADERS) || self.matches(&norm, &LATLONG6_HEADERS) {
            TableShape::LatLong
        } else {
            TableShape::Unknown
        }
    }

    fn matches(&self, cells: &[String], expected: &[&str]) -> bool {
        cells.len() == expected.len()
            && cells.iter().zip(expected).all(|(cell, want)| {
                if *want == DWG_REF_SLOT {
                    self.dwg_ref.iter().any(|s| s == cell)
                } else {
                    cell == want
                }
            })
    }
}

/// A persisted tag wins outright; otherwise the header decides.
pub fn classify<S: AsRef<str>>(
    tag: Option<TableShape>,
    headers: &[S],
    matcher: &HeaderMatcher,
) -> TableShape {
    match tag {
        Some(shape) if shape != TableShape::Unknown => shape,
        _ => matcher.classify_header(headers),
    }
}

// ---------------------------------------------------------------------------
// Layout of a stored table
// ---------------------------------------------------------------------------

/// Where a table's data lives and how its columns map to fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLayout {
    pub table: TableId,
    pub shape: TableShape,
    pub from_tag: bool,
    pub header_row: Option<usize>,
    pub data_start: usize,
    pub rows: usize,
    pub cols: usize,
    #[serde(skip)]
    pub columns: Vec<(usize, Field)>,
}

impl TableLayout {
    pub fn column_of(&self, field: Field) -> Option<usize> {
        self.columns.iter().find(|(_, f)| *f == field).map(|(c, _)| *c)
    }
}

/// Read a table's tag and leading rows and decide its layout.
///
/// Unreadable cells count as blank. Without a header row, data starts at
/// row 0; rows whose key does not resolve are left alone downstream.
pub fn read_layout<S: TableStore + ?Sized>(
    store: &S,
    table: TableId,
    matcher: &HeaderMatcher,
    config: &EngineConfig,
    log: &mut CommandLog,
) -> TableLayout {
    let rows = store.row_count(table);
    let cols = store.col_count(table);
    let tag = store.shape_tag(table).filter(|s| *s != TableShape::Unknown);

    let mut header_row = None;
    let mut header_cells: Vec<String> = Vec::new();
    for row in 0..rows.min(config.header_scan_rows) {
        let cells: Vec<String> = (0..cols)
            .map(|col| match store.cell_text(table, row, col) {
                Ok(text) => text,
                Err(e) => {
                    log.debug(format!("table {table}: cannot read header cell ({row},{col}): {e}"));
                    String::new()
                }
            })
            .collect();
        if matcher.classify_header(&cells) != TableShape::Unknown {
            header_row = Some(row);
            header_cells = cells;
            break;
        }
    }

    let shape = classify(tag, &header_cells, matcher);

    TableLayout {
        table,
        shape,
        from_tag: tag.is_some(),
        header_row,
        data_start: header_row.map(|r| r + 1).unwrap_or(0),
        rows,
        cols,
        columns: shape.columns(cols),
    }
}
