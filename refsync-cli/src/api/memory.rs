//! In-memory record service
//!
//! Holds tables, schemas and relationship metadata for one environment and
//! applies batched writes to them. Every submitted batch is recorded so
//! callers can assert on what would have been sent to a real environment.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::metadata::{EntitySchema, ManyToManyMetadata};
use super::operations::{BatchResponse, Fields, Operation, OperationResult};
use super::service::RecordService;
use crate::sync::record::{Record, RecordSet};
use crate::sync::value::{AttributeValue, EntityReference, format_value};

#[derive(Debug, Default)]
struct MemoryState {
    schemas: HashMap<String, EntitySchema>,
    tables: HashMap<String, RecordSet>,
    relationships: HashMap<String, ManyToManyMetadata>,
    /// record id -> fault message returned for any write to it
    faults: HashMap<String, String>,
    /// entity -> retrieval error message
    unreadable: HashMap<String, String>,
    batches: Vec<Vec<Operation>>,
}

/// [`RecordService`] backed by process memory
#[derive(Debug)]
pub struct InMemoryService {
    name: String,
    state: RwLock<MemoryState>,
}

impl InMemoryService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_schema(self, schema: EntitySchema) -> Self {
        self.write()
            .schemas
            .insert(schema.logical_name.to_lowercase(), schema);
        self
    }

    pub fn with_records(self, entity: &str, records: impl IntoIterator<Item = Record>) -> Self {
        {
            let mut state = self.write();
            let table = state
                .tables
                .entry(entity.to_lowercase())
                .or_insert_with(|| RecordSet::new(entity));
            for record in records {
                table.insert(record);
            }
        }
        self
    }

    /// Register N:N metadata and an (initially empty) intersect table
    pub fn with_relationship(self, metadata: ManyToManyMetadata) -> Self {
        {
            let mut state = self.write();
            state
                .tables
                .entry(metadata.intersect_entity.to_lowercase())
                .or_insert_with(|| RecordSet::new(&metadata.intersect_entity));
            state
                .relationships
                .insert(metadata.schema_name.to_lowercase(), metadata);
        }
        self
    }

    /// Add an association row to a registered relationship
    pub fn with_association(self, relationship: &str, id1: &str, id2: &str) -> Self {
        {
            let mut state = self.write();
            if let Some(metadata) = state.relationships.get(&relationship.to_lowercase()).cloned() {
                insert_association(&mut state, &metadata, id1, id2);
            }
        }
        self
    }

    /// Every write addressed to `record_id` faults with `message`
    pub fn with_fault(self, record_id: &str, message: impl Into<String>) -> Self {
        self.write()
            .faults
            .insert(record_id.to_lowercase(), message.into());
        self
    }

    /// Retrieval of `entity` fails with `message`
    pub fn with_unreadable(self, entity: &str, message: impl Into<String>) -> Self {
        self.write()
            .unreadable
            .insert(entity.to_lowercase(), message.into());
        self
    }

    /// Current content of a table
    pub fn records(&self, entity: &str) -> RecordSet {
        self.read()
            .tables
            .get(&entity.to_lowercase())
            .cloned()
            .unwrap_or_else(|| RecordSet::new(entity))
    }

    pub fn record(&self, entity: &str, id: &str) -> Option<Record> {
        self.read()
            .tables
            .get(&entity.to_lowercase())
            .and_then(|t| t.get(&id.to_lowercase()).cloned())
    }

    /// Number of `execute_batch` calls received
    pub fn batch_calls(&self) -> usize {
        self.read().batches.len()
    }

    /// Every submitted batch, in order
    pub fn batches(&self) -> Vec<Vec<Operation>> {
        self.read().batches.clone()
    }

    /// Number of individual operations received
    pub fn write_count(&self) -> usize {
        self.read().batches.iter().map(Vec::len).sum()
    }
}

fn association_id(id1: &str, id2: &str) -> String {
    format!("{}:{}", id1.to_lowercase(), id2.to_lowercase())
}

fn insert_association(state: &mut MemoryState, metadata: &ManyToManyMetadata, id1: &str, id2: &str) {
    let record = Record::new(&metadata.intersect_entity, association_id(id1, id2))
        .with(
            &metadata.entity1_key,
            AttributeValue::Reference(EntityReference::new(&metadata.entity1, id1.to_lowercase())),
        )
        .with(
            &metadata.entity2_key,
            AttributeValue::Reference(EntityReference::new(&metadata.entity2, id2.to_lowercase())),
        );
    state
        .tables
        .entry(metadata.intersect_entity.to_lowercase())
        .or_insert_with(|| RecordSet::new(&metadata.intersect_entity))
        .insert(record);
}

fn merge_fields(record: &mut Record, fields: &Fields) {
    for (name, value) in fields {
        record.attributes.insert(name.clone(), value.clone());
    }
}

/// Apply one write, returning the fault message when it is rejected
fn apply(state: &mut MemoryState, operation: &Operation) -> Result<(), String> {
    if let Some(message) = state.faults.get(&operation.record_id().to_lowercase()) {
        return Err(message.clone());
    }

    match operation {
        Operation::Upsert { entity, id, fields } => {
            let table = state
                .tables
                .entry(entity.to_lowercase())
                .or_insert_with(|| RecordSet::new(entity));
            let id = id.to_lowercase();
            match table.get_mut(&id) {
                Some(record) => merge_fields(record, fields),
                None => {
                    let mut record = Record::new(entity, id);
                    merge_fields(&mut record, fields);
                    table.insert(record);
                }
            }
            Ok(())
        }
        Operation::Update { entity, id, fields } => {
            let record = existing(state, entity, id)?;
            merge_fields(record, fields);
            Ok(())
        }
        Operation::SetState { entity, id, state: code, status } => {
            let record = existing(state, entity, id)?;
            record
                .attributes
                .insert("statecode".to_string(), AttributeValue::Choice(*code));
            record
                .attributes
                .insert("statuscode".to_string(), AttributeValue::Choice(*status));
            Ok(())
        }
        Operation::Associate { relationship, id1, id2, .. } => {
            let metadata = relationship_of(state, relationship)?;
            let key = association_id(id1, id2);
            let exists = state
                .tables
                .get(&metadata.intersect_entity.to_lowercase())
                .is_some_and(|t| t.contains(&key));
            if exists {
                return Err(format!("Association {} already exists", key));
            }
            insert_association(state, &metadata, id1, id2);
            Ok(())
        }
        Operation::Disassociate { relationship, id1, id2, .. } => {
            let metadata = relationship_of(state, relationship)?;
            let key = association_id(id1, id2);
            state
                .tables
                .get_mut(&metadata.intersect_entity.to_lowercase())
                .and_then(|t| t.remove(&key))
                .map(|_| ())
                .ok_or_else(|| format!("Association {} does not exist", key))
        }
    }
}

fn existing<'a>(state: &'a mut MemoryState, entity: &str, id: &str) -> Result<&'a mut Record, String> {
    state
        .tables
        .get_mut(&entity.to_lowercase())
        .and_then(|t| t.get_mut(&id.to_lowercase()))
        .ok_or_else(|| format!("{} With Id = {} Does Not Exist", entity, id))
}

fn relationship_of(state: &MemoryState, relationship: &str) -> Result<ManyToManyMetadata, String> {
    state
        .relationships
        .get(&relationship.to_lowercase())
        .cloned()
        .ok_or_else(|| format!("Relationship '{}' not found", relationship))
}

/// One `field eq value` condition
#[derive(Debug, Clone, PartialEq)]
struct Condition {
    field: String,
    value: Option<String>,
}

/// Parse the `field eq value [and field eq value ...]` subset of OData filters
fn parse_filter(filter: &str) -> Result<Vec<Condition>> {
    filter
        .split(" and ")
        .map(|clause| {
            let mut parts = clause.trim().splitn(3, ' ');
            let (Some(field), Some(op), Some(literal)) = (parts.next(), parts.next(), parts.next()) else {
                anyhow::bail!("Unsupported filter clause '{}'", clause.trim());
            };
            if !op.eq_ignore_ascii_case("eq") {
                anyhow::bail!("Unsupported filter operator '{}'", op);
            }
            let literal = literal.trim();
            let value = if literal.eq_ignore_ascii_case("null") {
                None
            } else {
                Some(
                    literal
                        .strip_prefix('\'')
                        .and_then(|l| l.strip_suffix('\''))
                        .map(|l| l.replace("''", "'"))
                        .unwrap_or_else(|| literal.to_string()),
                )
            };
            Ok(Condition {
                field: field.to_string(),
                value,
            })
        })
        .collect()
}

fn matches(record: &Record, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| {
        let actual = match record.get(&c.field) {
            Some(AttributeValue::Reference(r)) => Some(r.target_id.clone()),
            other => format_value(other),
        };
        match (&actual, &c.value) {
            (Some(a), Some(v)) => a.eq_ignore_ascii_case(v),
            (None, None) => true,
            _ => false,
        }
    })
}

#[async_trait]
impl RecordService for InMemoryService {
    fn environment_name(&self) -> &str {
        &self.name
    }

    async fn retrieve_records(&self, entity: &str, filter: Option<&str>) -> Result<RecordSet> {
        let state = self.read();
        let key = entity.to_lowercase();
        if let Some(message) = state.unreadable.get(&key) {
            anyhow::bail!("{}", message);
        }

        let table = match state.tables.get(&key) {
            Some(table) => table.clone(),
            None if state.schemas.contains_key(&key) => RecordSet::new(entity),
            None => anyhow::bail!("Entity '{}' does not exist in {}", entity, self.name),
        };

        let Some(filter) = filter.filter(|f| !f.trim().is_empty()) else {
            return Ok(table);
        };
        let conditions = parse_filter(filter)?;
        Ok(RecordSet::from_records(
            &table.entity,
            table.iter().filter(|r| matches(r, &conditions)).cloned(),
        ))
    }

    async fn retrieve_records_by_query(&self, entity: &str, _fetch_xml: &str) -> Result<RecordSet> {
        let state = self.read();
        let key = entity.to_lowercase();
        if let Some(message) = state.unreadable.get(&key) {
            anyhow::bail!("{}", message);
        }
        Ok(state
            .tables
            .get(&key)
            .cloned()
            .unwrap_or_else(|| RecordSet::new(entity)))
    }

    async fn get_schema(&self, entity: &str) -> Result<EntitySchema> {
        self.read()
            .schemas
            .get(&entity.to_lowercase())
            .cloned()
            .with_context(|| format!("Entity '{}' does not exist in {}", entity, self.name))
    }

    async fn execute_batch(&self, operations: &[Operation], continue_on_error: bool) -> Result<BatchResponse> {
        let mut state = self.write();
        state.batches.push(operations.to_vec());

        let mut results = Vec::with_capacity(operations.len());
        for (index, operation) in operations.iter().enumerate() {
            match apply(&mut state, operation) {
                Ok(()) => results.push(OperationResult::success(index, Some(204))),
                Err(message) => {
                    results.push(OperationResult::error(index, message, Some(400)));
                    if !continue_on_error {
                        break;
                    }
                }
            }
        }
        Ok(BatchResponse::from_results(results))
    }

    async fn resolve_many_to_many(&self, relationship: &str) -> Result<ManyToManyMetadata> {
        relationship_of(&self.read(), relationship).map_err(anyhow::Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::{FieldMetadata, FieldType};

    fn service() -> InMemoryService {
        InMemoryService::new("dev")
            .with_schema(
                EntitySchema::new("account", "accounts", "accountid")
                    .with_field(FieldMetadata::new("name", FieldType::String)),
            )
            .with_records(
                "account",
                [
                    Record::new("account", "a").with("name", AttributeValue::String("Alice".to_string())),
                    Record::new("account", "b").with("name", AttributeValue::String("O'Brien".to_string())),
                ],
            )
    }

    fn fields(name: &str) -> Fields {
        Fields::from([("name".to_string(), AttributeValue::String(name.to_string()))])
    }

    #[tokio::test]
    async fn test_filter_subset() {
        let service = service();
        let all = service.retrieve_records("account", None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = service
            .retrieve_records("account", Some("name eq 'O''Brien'"))
            .await
            .unwrap();
        assert_eq!(filtered.ids().collect::<Vec<_>>(), vec!["b"]);

        assert!(service.retrieve_records("account", Some("name gt 'A'")).await.is_err());
        assert!(service.retrieve_records("contact", None).await.is_err());
    }

    #[tokio::test]
    async fn test_batch_applies_writes_and_faults() {
        let service = service().with_fault("c", "Duplicate name");

        let response = service
            .execute_batch(
                &[
                    Operation::upsert("account", "a", fields("Alicia")),
                    Operation::upsert("account", "c", fields("Carl")),
                    Operation::update("account", "missing", fields("X")),
                    Operation::set_state("account", "b", 1, 2),
                ],
                true,
            )
            .await
            .unwrap();

        assert!(response.faulted);
        assert_eq!(response.fault_count(), 2);
        assert_eq!(
            response.faults().map(|(i, _)| i).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(service.batch_calls(), 1);
        assert_eq!(service.write_count(), 4);

        let a = service.record("account", "a").unwrap();
        assert_eq!(a.get_str("name"), Some("Alicia"));
        assert!(service.record("account", "c").is_none());
        assert_eq!(
            service.record("account", "b").unwrap().get("statecode"),
            Some(&AttributeValue::Choice(1))
        );
    }

    #[tokio::test]
    async fn test_stop_on_first_fault_without_continue() {
        let service = service().with_fault("a", "Locked");
        let response = service
            .execute_batch(
                &[
                    Operation::upsert("account", "a", fields("A")),
                    Operation::upsert("account", "d", fields("D")),
                ],
                false,
            )
            .await
            .unwrap();
        assert_eq!(response.results.len(), 1);
        assert!(service.record("account", "d").is_none());
    }

    #[tokio::test]
    async fn test_associations() {
        let metadata = ManyToManyMetadata {
            schema_name: "account_contact".to_string(),
            intersect_entity: "accountcontact".to_string(),
            entity1: "account".to_string(),
            entity1_key: "accountid".to_string(),
            entity2: "contact".to_string(),
            entity2_key: "contactid".to_string(),
        };
        let service = InMemoryService::new("dev")
            .with_relationship(metadata.clone())
            .with_association("account_contact", "A", "1");

        assert_eq!(service.resolve_many_to_many("Account_Contact").await.unwrap(), metadata);
        assert!(service.resolve_many_to_many("missing").await.is_err());

        let associate = Operation::Associate {
            relationship: "account_contact".to_string(),
            entity1: "account".to_string(),
            id1: "a".to_string(),
            entity2: "contact".to_string(),
            id2: "2".to_string(),
        };
        let disassociate = Operation::Disassociate {
            relationship: "account_contact".to_string(),
            entity1: "account".to_string(),
            id1: "a".to_string(),
            entity2: "contact".to_string(),
            id2: "1".to_string(),
        };
        let response = service.execute_batch(&[associate, disassociate], true).await.unwrap();
        assert!(!response.faulted);

        let rows = service
            .retrieve_records_by_query("accountcontact", "<fetch />")
            .await
            .unwrap();
        assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["a:2"]);
    }
}
