//! Configuration: sync definitions and environment connections

pub mod environment;
pub mod sync;

pub use environment::Environment;
pub use sync::{
    DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, ManyToManyConfig, RelationshipSource, SyncConfig,
    TableSyncConfig,
};
