//! Remote record service contract used by the sync engine

use anyhow::Result;
use async_trait::async_trait;

use super::metadata::{EntitySchema, ManyToManyMetadata};
use super::operations::{BatchResponse, Operation};
use crate::sync::record::RecordSet;

/// Everything the comparator and migrator need from one environment
#[async_trait]
pub trait RecordService: Send + Sync {
    /// Environment name, used in summaries and log lines
    fn environment_name(&self) -> &str;

    /// Retrieve all records of an entity, optionally narrowed by an OData `$filter`
    async fn retrieve_records(&self, entity: &str, filter: Option<&str>) -> Result<RecordSet>;

    /// Retrieve records through a FetchXML query (used for intersect entities)
    async fn retrieve_records_by_query(&self, entity: &str, fetch_xml: &str) -> Result<RecordSet>;

    /// Entity schema including attribute writability
    async fn get_schema(&self, entity: &str) -> Result<EntitySchema>;

    /// Submit one batch of writes
    async fn execute_batch(
        &self,
        operations: &[Operation],
        continue_on_error: bool,
    ) -> Result<BatchResponse>;

    /// Look up N:N relationship metadata by schema name
    async fn resolve_many_to_many(&self, relationship: &str) -> Result<ManyToManyMetadata>;
}
