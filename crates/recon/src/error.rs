use thiserror::Error;

/// Fatal engine errors. Anything recoverable at row, cell or table scope is
/// logged through [`crate::logctx::CommandLog`] instead of surfacing here.
#[derive(Debug, Error)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (empty block name, empty synonym list, ...).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Flat-record import: a data line has a blank CROSSING cell.
    #[error("line {line}: blank CROSSING value")]
    BlankKey { line: u64 },
    /// Flat-record import: the same crossing key appears twice.
    #[error("line {line}: crossing '{key}' already defined on line {first_line}")]
    DuplicateKey { key: String, first_line: u64, line: u64 },
    /// Malformed delimited input or output failure.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// Inserting a crossing needs the tracked block definition.
    #[error("block definition '{0}' not found in drawing")]
    MissingBlockDefinition(String),
    /// A collaborator failed in a way the operation cannot recover from.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ReconError>;

/// Failures reported by the drawing collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} is read-only")]
    ReadOnly(String),
    #[error("{0}")]
    Failed(String),
}
