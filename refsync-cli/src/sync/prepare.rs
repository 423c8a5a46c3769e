//! Table preparation: classify columns and compute the write plan
//!
//! Each source record is diffed against its target counterpart per bucket,
//! with typed equality. Flat and reference changes are scheduled
//! independently, so a record whose only change is a lookup is never
//! re-upserted and vice versa.

use std::collections::HashSet;

use super::columns::{ColumnClassification, STATE_FIELD, STATUS_FIELD, classify_columns};
use super::error::SyncError;
use super::record::{Record, RecordSet};
use super::types::TableMigrationResult;
use super::value::{AttributeValue, values_equal};
use crate::api::RecordService;
use crate::api::metadata::EntitySchema;
use crate::api::operations::Fields;
use crate::config::TableSyncConfig;

/// statecode of an active record
pub const DEFAULT_STATE: i32 = 0;

/// statuscode meaning "default status for the state"
pub const DEFAULT_STATUS: i32 = -1;

/// A planned flat or reference write
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedWrite {
    pub id: String,
    pub fields: Fields,
}

/// Writes needed for one table, each carrying only its bucket's attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WritePlan {
    pub flat_writes: Vec<PlannedWrite>,
    pub reference_writes: Vec<PlannedWrite>,
    pub state_writes: Vec<PlannedState>,
}

/// A planned state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedState {
    pub id: String,
    pub state: i32,
    pub status: i32,
}

impl WritePlan {
    pub fn is_empty(&self) -> bool {
        self.flat_writes.is_empty() && self.reference_writes.is_empty() && self.state_writes.is_empty()
    }

    pub fn flat_ids(&self) -> HashSet<&str> {
        self.flat_writes.iter().map(|w| w.id.as_str()).collect()
    }

    pub fn reference_ids(&self) -> HashSet<&str> {
        self.reference_writes.iter().map(|w| w.id.as_str()).collect()
    }

    pub fn state_ids(&self) -> HashSet<&str> {
        self.state_writes.iter().map(|w| w.id.as_str()).collect()
    }
}

/// Everything the migrator needs to run the passes for one table
#[derive(Debug, Clone)]
pub struct PreparedTable {
    pub config: TableSyncConfig,
    pub schema: EntitySchema,
    pub columns: ColumnClassification,
    pub plan: WritePlan,
    pub result: TableMigrationResult,
}

/// Read (state, status) from a record, `None` when the state is absent
pub fn record_state(record: &Record) -> Option<(i32, i32)> {
    let state = record.get(STATE_FIELD).and_then(AttributeValue::as_code)?;
    let status = record
        .get(STATUS_FIELD)
        .and_then(AttributeValue::as_code)
        .unwrap_or(DEFAULT_STATUS);
    Some((state, status))
}

/// Compute the write plan for one table.
///
/// `target` is `None` in force mode: every source record is then treated
/// as new.
pub fn plan_writes(
    columns: &ColumnClassification,
    source: &RecordSet,
    target: Option<&RecordSet>,
    manage_state: bool,
    result: &mut TableMigrationResult,
) -> WritePlan {
    let flat_columns = columns.flat();
    let reference_columns = columns.reference();
    let mut plan = WritePlan::default();

    for record in source.iter() {
        let existing = target.and_then(|t| t.get(&record.id));
        let mut scheduled = false;

        match existing {
            None => {
                plan.flat_writes.push(PlannedWrite {
                    id: record.id.clone(),
                    fields: collect_fields(record, &flat_columns),
                });
                scheduled = true;

                let references: Fields = reference_columns
                    .iter()
                    .filter_map(|c| {
                        record
                            .get(c)
                            .filter(|v| !v.is_null())
                            .map(|v| (c.to_string(), v.clone()))
                    })
                    .collect();
                if !references.is_empty() {
                    plan.reference_writes.push(PlannedWrite {
                        id: record.id.clone(),
                        fields: references,
                    });
                }
            }
            Some(existing) => {
                let flat_changed = flat_columns
                    .iter()
                    .any(|c| !values_equal(record.get(c), existing.get(c)));
                if flat_changed {
                    plan.flat_writes.push(PlannedWrite {
                        id: record.id.clone(),
                        fields: collect_fields(record, &flat_columns),
                    });
                    scheduled = true;
                }

                let changed_references: Fields = reference_columns
                    .iter()
                    .filter(|c| !values_equal(record.get(c), existing.get(c)))
                    .map(|c| {
                        (
                            c.to_string(),
                            record.get(c).cloned().unwrap_or(AttributeValue::Null),
                        )
                    })
                    .collect();
                if !changed_references.is_empty() {
                    plan.reference_writes.push(PlannedWrite {
                        id: record.id.clone(),
                        fields: changed_references,
                    });
                    scheduled = true;
                }
            }
        }

        if manage_state {
            if let Some((state, status)) = record_state(record).filter(|(s, _)| *s != DEFAULT_STATE) {
                let differs = match existing {
                    None => true,
                    Some(existing) => record_state(existing) != Some((state, status)),
                };
                if differs {
                    plan.state_writes.push(PlannedState {
                        id: record.id.clone(),
                        state,
                        status,
                    });
                    scheduled = true;
                }
            }
        }

        if !scheduled {
            result.skipped += 1;
        }
    }

    plan
}

fn collect_fields(record: &Record, columns: &[&str]) -> Fields {
    columns
        .iter()
        .map(|c| {
            (
                c.to_string(),
                record.get(c).cloned().unwrap_or(AttributeValue::Null),
            )
        })
        .collect()
}

/// Retrieve schema and records for one table and compute its write plan
pub async fn prepare_table(
    source: &dyn RecordService,
    target: &dyn RecordService,
    config: &TableSyncConfig,
    force: bool,
) -> Result<PreparedTable, SyncError> {
    let entity = config.entity.as_str();

    let schema = target
        .get_schema(entity)
        .await
        .map_err(|e| SyncError::preparation(entity, e))?;
    let columns = classify_columns(&schema, &config.include_fields, &config.exclude_fields);

    let source_records = source
        .retrieve_records(entity, config.filter.as_deref())
        .await
        .map_err(|e| SyncError::preparation(entity, e))?;

    let target_records = if force {
        None
    } else {
        Some(
            target
                .retrieve_records(entity, None)
                .await
                .map_err(|e| SyncError::preparation(entity, e))?,
        )
    };

    let mut result = TableMigrationResult::new(entity, source_records.len());
    let plan = plan_writes(
        &columns,
        &source_records,
        target_records.as_ref(),
        config.manage_state,
        &mut result,
    );

    log::info!(
        "Prepared {}: {} source records, {} flat, {} lookup, {} state writes, {} unchanged",
        entity,
        source_records.len(),
        plan.flat_writes.len(),
        plan.reference_writes.len(),
        plan.state_writes.len(),
        result.skipped
    );

    Ok(PreparedTable {
        config: config.clone(),
        schema,
        columns,
        plan,
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::metadata::{FieldMetadata, FieldType};
    use crate::sync::value::EntityReference;

    fn schema() -> EntitySchema {
        EntitySchema::new("nrq_fund", "nrq_funds", "nrq_fundid")
            .with_field(FieldMetadata::new("nrq_name", FieldType::String))
            .with_field(FieldMetadata::new("nrq_rank", FieldType::Integer))
            .with_field(FieldMetadata::lookup("nrq_parentid", "nrq_fund"))
            .with_field(FieldMetadata::new("statecode", FieldType::State))
            .with_field(FieldMetadata::new("statuscode", FieldType::Status))
    }

    fn fund(id: &str, name: &str, parent: Option<&str>) -> Record {
        let parent = parent
            .map(|p| AttributeValue::Reference(EntityReference::new("nrq_fund", p)))
            .unwrap_or(AttributeValue::Null);
        Record::new("nrq_fund", id)
            .with("nrq_name", AttributeValue::String(name.to_string()))
            .with("nrq_rank", AttributeValue::Int(1))
            .with("nrq_parentid", parent)
            .with("statecode", AttributeValue::Choice(0))
            .with("statuscode", AttributeValue::Choice(1))
    }

    fn inactive(record: Record) -> Record {
        record
            .with("statecode", AttributeValue::Choice(1))
            .with("statuscode", AttributeValue::Choice(2))
    }

    fn plan(source: &[Record], target: Option<&[Record]>, manage_state: bool) -> (WritePlan, TableMigrationResult) {
        let columns = classify_columns(&schema(), &[], &[]);
        let source = RecordSet::from_records("nrq_fund", source.to_vec());
        let target = target.map(|t| RecordSet::from_records("nrq_fund", t.to_vec()));
        let mut result = TableMigrationResult::new("nrq_fund", source.len());
        let plan = plan_writes(&columns, &source, target.as_ref(), manage_state, &mut result);
        (plan, result)
    }

    #[test]
    fn test_new_record_gets_flat_and_reference_writes() {
        let (plan, result) = plan(&[fund("a", "A", Some("p")), fund("b", "B", None)], Some(&[]), false);

        assert_eq!(plan.flat_ids(), HashSet::from(["a", "b"]));
        // Only "a" has a non-null lookup
        assert_eq!(plan.reference_ids(), HashSet::from(["a"]));
        assert_eq!(result.skipped, 0);

        let flat = &plan.flat_writes[0];
        assert!(flat.fields.contains_key("nrq_name"));
        assert!(!flat.fields.contains_key("nrq_parentid"));
        assert!(!flat.fields.contains_key("statecode"));
    }

    #[test]
    fn test_identical_records_are_skipped() {
        let records = [fund("a", "A", Some("p")), fund("b", "B", None)];
        let (plan, result) = plan(&records, Some(&records), true);

        assert!(plan.is_empty());
        assert_eq!(result.skipped, 2);
    }

    #[test]
    fn test_flat_change_only() {
        let (plan, _) = plan(&[fund("a", "A2", Some("p"))], Some(&[fund("a", "A", Some("p"))]), false);
        assert_eq!(plan.flat_ids(), HashSet::from(["a"]));
        assert!(plan.reference_writes.is_empty());
    }

    #[test]
    fn test_reference_change_only() {
        let (plan, result) = plan(&[fund("a", "A", Some("q"))], Some(&[fund("a", "A", Some("p"))]), false);
        assert!(plan.flat_writes.is_empty());
        assert_eq!(plan.reference_ids(), HashSet::from(["a"]));
        assert_eq!(result.skipped, 0);

        let patch = &plan.reference_writes[0];
        assert_eq!(patch.fields.len(), 1);
        assert_eq!(
            patch.fields["nrq_parentid"].as_reference().map(|r| r.target_id.as_str()),
            Some("q")
        );
    }

    #[test]
    fn test_cleared_reference_is_written_as_null() {
        let (plan, _) = plan(&[fund("a", "A", None)], Some(&[fund("a", "A", Some("p"))]), false);
        assert_eq!(plan.reference_writes[0].fields["nrq_parentid"], AttributeValue::Null);
    }

    #[test]
    fn test_force_mode_treats_everything_as_new() {
        let records = [fund("a", "A", Some("p")), fund("b", "B", None)];
        let (plan, result) = plan(&records, None, false);

        assert_eq!(plan.flat_writes.len(), 2);
        assert_eq!(plan.reference_writes.len(), 1);
        assert_eq!(result.skipped, 0);
    }

    #[test]
    fn test_state_writes() {
        let source = [
            inactive(fund("new", "N", None)),
            inactive(fund("same", "S", None)),
            inactive(fund("changed", "C", None)),
            fund("active", "A", None),
        ];
        let target = [
            inactive(fund("same", "S", None)),
            fund("changed", "C", None),
            inactive(fund("active", "A", None)),
        ];

        let (plan, result) = plan(&source, Some(&target), true);

        // Default state never schedules, even when the target differs
        assert_eq!(plan.state_ids(), HashSet::from(["new", "changed"]));
        assert_eq!(plan.state_writes.iter().find(|s| s.id == "changed").unwrap().status, 2);
        // "same" and "active" match on every bucket that is synchronized
        assert_eq!(result.skipped, 2);
    }

    #[test]
    fn test_state_ignored_without_manage_state() {
        let source = [inactive(fund("a", "A", None))];
        let target = [fund("a", "A", None)];
        let (plan, result) = plan(&source, Some(&target), false);
        assert!(plan.state_writes.is_empty());
        assert_eq!(result.skipped, 1);
    }
}
