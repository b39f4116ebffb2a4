use serde::Deserialize;

use crate::error::ReconError;
use crate::model::Field;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Block type whose instances carry crossing attributes.
    pub block_name: String,
    /// Space whose instances are preferred as canonical.
    pub primary_space: String,
    /// Spaces whose instances never vote in duplicate resolution.
    pub ignored_spaces: Vec<String>,
    pub tags: TagConfig,
    /// Tag priority for reading a row key from a block embedded in a cell.
    pub cell_key_tags: Vec<String>,
    /// Extra DWG_REF header spellings, on top of the built-in ones.
    pub dwg_ref_headers: Vec<String>,
    /// Leading rows searched for a header row.
    pub header_scan_rows: usize,
    /// Invalid decisions re-prompted before treating the pass as cancelled.
    pub max_decision_rounds: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_name: "XING".into(),
            primary_space: "Model".into(),
            ignored_spaces: Vec::new(),
            tags: TagConfig::default(),
            cell_key_tags: vec!["CROSSING".into(), "XING".into(), "ID".into()],
            dwg_ref_headers: Vec::new(),
            header_scan_rows: 3,
            max_decision_rounds: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute tags
// ---------------------------------------------------------------------------

/// Attribute tag synonyms per field. Reads take the first tag present.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub crossing: Vec<String>,
    pub owner: Vec<String>,
    pub description: Vec<String>,
    pub location: Vec<String>,
    pub dwg_ref: Vec<String>,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            crossing: vec!["CROSSING".into(), "XING".into(), "CROSSING_ID".into()],
            owner: vec!["OWNER".into()],
            description: vec!["DESCRIPTION".into(), "DESC".into()],
            location: vec!["LOCATION".into(), "LOC".into()],
            dwg_ref: vec!["DWG_REF".into(), "DWGREF".into(), "DWG".into()],
        }
    }
}

impl TagConfig {
    /// Synonyms for a text field. Coordinate fields live in the
    /// side-channel and have no tags.
    pub fn for_field(&self, field: Field) -> &[String] {
        match field {
            Field::Crossing => &self.crossing,
            Field::Owner => &self.owner,
            Field::Description => &self.description,
            Field::Location => &self.location,
            Field::DwgRef => &self.dwg_ref,
            Field::Lat | Field::Long | Field::Zone => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReconError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| ReconError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ReconError> {
        if self.block_name.trim().is_empty() {
            return Err(ReconError::ConfigValidation("block_name must not be empty".into()));
        }
        if self.primary_space.trim().is_empty() {
            return Err(ReconError::ConfigValidation("primary_space must not be empty".into()));
        }
        if self
            .ignored_spaces
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&self.primary_space))
        {
            return Err(ReconError::ConfigValidation(format!(
                "primary_space '{}' cannot also be ignored",
                self.primary_space
            )));
        }
        for field in Field::TEXT {
            let tags = self.tags.for_field(field);
            if tags.is_empty() || tags.iter().any(|t| t.trim().is_empty()) {
                return Err(ReconError::ConfigValidation(format!(
                    "tags.{}: at least one non-empty tag is required",
                    field.header().to_lowercase()
                )));
            }
        }
        if self.cell_key_tags.is_empty() {
            return Err(ReconError::ConfigValidation("cell_key_tags must not be empty".into()));
        }
        if self.header_scan_rows == 0 {
            return Err(ReconError::ConfigValidation("header_scan_rows must be at least 1".into()));
        }
        if self.max_decision_rounds == 0 {
            return Err(ReconError::ConfigValidation(
                "max_decision_rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn is_ignored_space(&self, space: &str) -> bool {
        self.ignored_spaces.iter().any(|s| s.eq_ignore_ascii_case(space))
    }

    pub fn is_primary_space(&self, space: &str) -> bool {
        self.primary_space.eq_ignore_ascii_case(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.block_name, "XING");
        assert_eq!(config.primary_space, "Model");
        assert_eq!(config.tags.owner, vec!["OWNER".to_string()]);
        assert_eq!(config.header_scan_rows, 3);
    }

    #[test]
    fn partial_override() {
        let config = EngineConfig::from_toml(
            r#"
block_name = "PIPE_XING"
ignored_spaces = ["Layout2"]

[tags]
owner = ["OWNER", "OPERATOR"]
"#,
        )
        .unwrap();
        assert_eq!(config.block_name, "PIPE_XING");
        assert!(config.is_ignored_space("layout2"));
        assert_eq!(config.tags.owner.len(), 2);
        // untouched tables keep defaults
        assert_eq!(config.tags.crossing[0], "CROSSING");
    }

    #[test]
    fn rejects_empty_block_name() {
        let err = EngineConfig::from_toml(r#"block_name = " ""#).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn rejects_empty_tag_list() {
        let err = EngineConfig::from_toml("[tags]\nowner = []").unwrap_err();
        assert!(err.to_string().contains("tags.owner"));
    }

    #[test]
    fn rejects_ignoring_primary_space() {
        let err = EngineConfig::from_toml(r#"ignored_spaces = ["model"]"#).unwrap_err();
        assert!(matches!(err, ReconError::ConfigValidation(_)));
    }

    #[test]
    fn rejects_bad_toml() {
        let err = EngineConfig::from_toml("block_name = [").unwrap_err();
        assert!(matches!(err, ReconError::ConfigParse(_)));
    }
}
