//! Data-preserving schema synchronisation for SQLite.
//!
//! `oxide-sync` compares a live *target* database with a *reference*
//! database (usually a staging copy that acts as the source of truth for
//! schema changes) and brings the target's structure in line with the
//! reference without discarding rows.
//!
//! # Architecture
//!
//! Data flows strictly downstream:
//!
//! - **Reader** - introspects a connection into [`TableSchema`] values
//! - **Compat** - decides whether a table can grow in place or needs a rebuild
//! - **Synthesizer** - turns two snapshots into an immutable [`MigrationPlan`]
//! - **Sandbox** - runs the plan on a throwaway copy and certifies it
//! - **Apply** - backs up the real target, applies the plan, re-certifies
//!
//! [`SyncPipeline`] drives the whole protocol and owns artifact storage.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sync::prelude::*;
//!
//! let pipeline = SyncPipeline::new("prod.db", "pre.db", SyncOptions::default());
//!
//! match pipeline.run().await? {
//!     SyncOutcome::NoChanges { .. } => println!("nothing to do"),
//!     outcome => println!("{outcome:?}"),
//! }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Validate and apply
//! oxide-sync sync --target prod.db --reference pre.db
//!
//! # Validate on a copy only
//! oxide-sync sync --target prod.db --reference pre.db --dry-run
//!
//! # Print the plan
//! oxide-sync plan --target prod.db --reference pre.db --format json
//!
//! # Refresh the reference from the live database
//! oxide-sync clone prod.db pre.db
//! ```

pub mod apply;
pub mod artifact;
pub mod clone;
pub mod compat;
pub mod constraints;
pub mod dialect;
pub mod error;
pub mod hold;
pub mod lexer;
pub mod pipeline;
pub mod plan;
pub mod reader;
pub mod sandbox;
pub mod schema;
pub mod synthesizer;
pub mod target;

pub use pipeline::{SyncOptions, SyncOutcome, SyncPipeline};
pub use plan::MigrationPlan;
pub use schema::TableSchema;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::apply::{ApplyEngine, ApplyOutcome};
    pub use crate::artifact::{ArtifactHeader, ArtifactStore};
    pub use crate::clone::{CloneMethod, CloneReport, clone_snapshot};
    pub use crate::compat::{Compatibility, RebuildReason, assess, is_add_only_safe};
    pub use crate::error::{FailedStatement, Result, SyncError};
    pub use crate::pipeline::{Interrupt, SyncOptions, SyncOutcome, SyncPipeline};
    pub use crate::plan::{
        MigrationPlan, PlanStatement, SchemaDiffClass, StatementKind, TableClassification,
    };
    pub use crate::reader::SchemaReader;
    pub use crate::sandbox::{ValidatedPlan, ValidationSandbox};
    pub use crate::schema::{ColumnDescriptor, SchemaObject, SchemaSnapshot, TableSchema};
    pub use crate::synthesizer::{MigrationSynthesizer, SynthesisError, SynthesisOptions};
    pub use crate::target::{BackupRecord, IntegrityReport, MigrationTarget, SqliteFileTarget};
}
