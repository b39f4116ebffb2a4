//! CLI Exit Code Registry
//!
//! Single source of truth for `xingsync` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                               |
//! |------|-------------------------------------------------------|
//! | 0    | Success                                               |
//! | 1    | General error (unspecified)                           |
//! | 2    | CLI usage error (bad args, unknown table id)          |
//! | 3    | Config file unreadable or invalid                     |
//! | 4    | Drawing snapshot cannot be read or written            |
//! | 5    | Flat-record import rejected (blank/duplicate key)     |
//! | 6    | Duplicate resolution cancelled, nothing applied       |
//! | 7    | Tracked block definition missing from the drawing     |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use xingsync_recon::ReconError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Reconciliation (3-7)
// =============================================================================

/// Config file could not be read, parsed or validated.
pub const EXIT_CONFIG: u8 = 3;

/// Drawing snapshot missing, malformed, or not writable.
pub const EXIT_DRAWING_IO: u8 = 4;

/// Flat-record file rejected as a whole.
pub const EXIT_IMPORT_REJECTED: u8 = 5;

/// The resolution decision was cancelled (or never became valid).
pub const EXIT_RESOLUTION_CANCELLED: u8 = 6;

/// Inserting a crossing needs a block definition the drawing lacks.
pub const EXIT_MISSING_BLOCK: u8 = 7;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_CONFIG,
        ReconError::BlankKey { .. } | ReconError::DuplicateKey { .. } | ReconError::Csv(_) => {
            EXIT_IMPORT_REJECTED
        }
        ReconError::MissingBlockDefinition(_) => EXIT_MISSING_BLOCK,
        ReconError::Store(_) => EXIT_DRAWING_IO,
    }
}
