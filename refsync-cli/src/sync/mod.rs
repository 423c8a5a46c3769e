//! Reference data comparison and synchronization engine

pub mod batch;
pub mod columns;
pub mod compare;
pub mod error;
pub mod many_to_many;
pub mod migrate;
pub mod prepare;
pub mod record;
pub mod types;
pub mod value;

pub use batch::{BatchExecutor, BatchOutcome, chunk_operations};
pub use columns::{ColumnBucket, ColumnClassification, classify_columns};
pub use compare::{
    ComparisonResult, CompareOptions, DifferenceType, RecordDifference, RelationshipComparisonResult,
    TableComparisonResult, compare_associations, compare_environments, compare_records,
};
pub use error::SyncError;
pub use many_to_many::reconcile_relationship;
pub use migrate::{MigrationOptions, Migrator};
pub use prepare::{PreparedTable, WritePlan, plan_writes, prepare_table};
pub use record::{Record, RecordSet};
pub use types::{
    ManyToManyMigrationResult, MigrationPhase, MigrationSummary, RecordError, RunStatus,
    TableMigrationResult,
};
pub use value::{AttributeValue, EntityReference, format_value, values_equal};
