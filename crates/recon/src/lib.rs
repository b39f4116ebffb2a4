//! `xingsync-recon`: reconciliation engine for crossing records.
//!
//! Pure engine crate: reads a drawing through the [`store`] traits, builds
//! one canonical record per crossing key, resolves duplicates and keeps
//! tables in step. No CLI or terminal dependencies.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod flatfile;
pub mod key;
pub mod logctx;
pub mod matcher;
pub mod memory;
pub mod model;
pub mod reverse;
pub mod rows;
pub mod store;
pub mod sync;

pub use classify::TableShape;
pub use config::EngineConfig;
pub use duplicates::{Decision, DuplicateKind, GroupId, ResolutionSession, ResolutionUi};
pub use error::{ReconError, StoreError};
pub use key::CrossingKey;
pub use logctx::CommandLog;
pub use memory::MemoryDrawing;
pub use model::{CanonicalSet, CrossingRecord, Field, InstanceId, RecordValues, TableId};
