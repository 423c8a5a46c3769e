//! Full structural comparison of record sets, for audit reports
//!
//! Every attribute is rendered with [`format_value`] and compared as a
//! string. The migrator does not use this module to decide its writes; it
//! keeps its own typed, bucket-scoped diff in `prepare`.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::columns::is_system_field;
use super::many_to_many::{fetch_pairs, resolve_relationship};
use super::record::{Record, RecordSet};
use super::value::{AttributeValue, format_value};
use crate::api::RecordService;
use crate::config::{ManyToManyConfig, SyncConfig, TableSyncConfig};

/// Conventional name-like attributes, tried in order for display names
pub const DISPLAY_NAME_FIELDS: &[&str] = &["name", "fullname", "title", "subject", "description"];

/// Kind of difference between environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifferenceType {
    /// Only in source
    New,
    /// In both, with differing attributes
    Modified,
    /// Only in target
    Deleted,
}

impl DifferenceType {
    pub fn label(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::New => "+",
            Self::Modified => "~",
            Self::Deleted => "-",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDifference {
    pub field: String,
    pub source_value: Option<String>,
    pub target_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDifference {
    pub record_id: String,
    pub display_name: String,
    pub difference_type: DifferenceType,
    /// Only populated for `Modified`
    pub field_differences: Vec<FieldDifference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableComparisonResult {
    pub entity: String,
    pub source_count: usize,
    pub target_count: usize,
    pub differences: Vec<RecordDifference>,
}

impl TableComparisonResult {
    fn count(&self, kind: DifferenceType) -> usize {
        self.differences
            .iter()
            .filter(|d| d.difference_type == kind)
            .count()
    }

    pub fn new_count(&self) -> usize {
        self.count(DifferenceType::New)
    }

    pub fn modified_count(&self) -> usize {
        self.count(DifferenceType::Modified)
    }

    pub fn deleted_count(&self) -> usize {
        self.count(DifferenceType::Deleted)
    }

    pub fn has_differences(&self) -> bool {
        !self.differences.is_empty()
    }
}

/// Options controlling which attributes take part in a comparison
#[derive(Debug, Clone, Copy)]
pub struct CompareOptions<'a> {
    pub exclude_fields: &'a [String],
    /// Allowlist; empty means all
    pub include_fields: &'a [String],
    pub primary_name_field: Option<&'a str>,
    pub primary_id_field: Option<&'a str>,
    /// Skip key-like attribute names when no primary id field is given
    pub infer_primary_keys: bool,
}

impl Default for CompareOptions<'_> {
    fn default() -> Self {
        Self {
            exclude_fields: &[],
            include_fields: &[],
            primary_name_field: None,
            primary_id_field: None,
            infer_primary_keys: true,
        }
    }
}

impl<'a> CompareOptions<'a> {
    pub fn for_table(table: &'a TableSyncConfig) -> Self {
        Self {
            exclude_fields: &table.exclude_fields,
            include_fields: &table.include_fields,
            primary_name_field: table.primary_name_field.as_deref(),
            primary_id_field: table.primary_id_field.as_deref(),
            infer_primary_keys: true,
        }
    }

    fn is_compared(&self, field: &str) -> bool {
        if self.exclude_fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            return false;
        }
        if !self.include_fields.is_empty()
            && !self.include_fields.iter().any(|f| f.eq_ignore_ascii_case(field))
        {
            return false;
        }
        if is_system_field(field) {
            return false;
        }
        match self.primary_id_field {
            Some(pk) => !pk.eq_ignore_ascii_case(field),
            None => !(self.infer_primary_keys && looks_like_primary_key(field)),
        }
    }
}

/// Name heuristic for primary keys: ends in "id", longer than two
/// characters and without separators (e.g. "accountid" but not "nrq_fundid").
///
/// Can misfire on ordinary attributes ending in "id"; disable it through
/// [`CompareOptions::infer_primary_keys`] or by naming the key explicitly.
pub fn looks_like_primary_key(field: &str) -> bool {
    field.len() > 2
        && field.to_ascii_lowercase().ends_with("id")
        && !field.contains(['_', '-', '.', ' '])
}

/// Display label for a record: configured name field, a conventional name
/// field, or the ID
pub fn display_name(record: &Record, primary_name_field: Option<&str>) -> String {
    primary_name_field
        .into_iter()
        .chain(DISPLAY_NAME_FIELDS.iter().copied())
        .find_map(|field| format_value(record.get(field)).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| record.id.clone())
}

/// Compare two record sets of the same entity
pub fn compare_records(
    entity: &str,
    source: &RecordSet,
    target: &RecordSet,
    options: &CompareOptions<'_>,
) -> TableComparisonResult {
    let mut result = TableComparisonResult {
        entity: entity.to_string(),
        source_count: source.len(),
        target_count: target.len(),
        differences: Vec::new(),
    };

    for record in source.iter() {
        match target.get(&record.id) {
            None => result.differences.push(RecordDifference {
                record_id: record.id.clone(),
                display_name: display_name(record, options.primary_name_field),
                difference_type: DifferenceType::New,
                field_differences: Vec::new(),
            }),
            Some(existing) => {
                let field_differences = compare_fields(record, existing, options);
                if !field_differences.is_empty() {
                    result.differences.push(RecordDifference {
                        record_id: record.id.clone(),
                        display_name: display_name(record, options.primary_name_field),
                        difference_type: DifferenceType::Modified,
                        field_differences,
                    });
                }
            }
        }
    }

    for record in target.iter().filter(|r| !source.contains(&r.id)) {
        result.differences.push(RecordDifference {
            record_id: record.id.clone(),
            display_name: display_name(record, options.primary_name_field),
            difference_type: DifferenceType::Deleted,
            field_differences: Vec::new(),
        });
    }

    log::debug!(
        "Compared {}: {} new, {} modified, {} deleted",
        entity,
        result.new_count(),
        result.modified_count(),
        result.deleted_count()
    );

    result
}

/// Field-level differences over the union of both records' attributes
fn compare_fields(source: &Record, target: &Record, options: &CompareOptions<'_>) -> Vec<FieldDifference> {
    let fields: BTreeSet<&str> = source
        .attributes
        .keys()
        .chain(target.attributes.keys())
        .map(String::as_str)
        .filter(|f| options.is_compared(f))
        .collect();

    fields
        .into_iter()
        .filter_map(|field| {
            let source_value = format_value(source.get(field));
            let target_value = format_value(target.get(field));
            (source_value != target_value).then(|| FieldDifference {
                field: field.to_string(),
                source_value,
                target_value,
            })
        })
        .collect()
}

/// One intersect row reduced to its endpoint IDs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssociationPair {
    pub id1: String,
    pub id2: String,
}

impl AssociationPair {
    pub fn new(id1: impl Into<String>, id2: impl Into<String>) -> Self {
        Self {
            id1: id1.into(),
            id2: id2.into(),
        }
    }
}

/// Reduce intersect records to endpoint pairs; rows missing either key are ignored
pub fn association_pairs(set: &RecordSet, field1: &str, field2: &str) -> BTreeSet<AssociationPair> {
    fn endpoint_id(value: Option<&AttributeValue>) -> Option<String> {
        match value? {
            AttributeValue::Reference(r) => Some(r.target_id.to_lowercase()),
            other => format_value(Some(other)).map(|s| s.to_lowercase()),
        }
    }

    set.iter()
        .filter_map(|record| {
            Some(AssociationPair {
                id1: endpoint_id(record.get(field1))?,
                id2: endpoint_id(record.get(field2))?,
            })
        })
        .collect()
}

/// Pure set difference between source and target pairs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairDiff {
    /// source - target
    pub to_associate: Vec<AssociationPair>,
    /// target - source
    pub to_disassociate: Vec<AssociationPair>,
    /// |source ∩ target|
    pub unchanged: usize,
}

pub fn diff_pairs(source: &BTreeSet<AssociationPair>, target: &BTreeSet<AssociationPair>) -> PairDiff {
    PairDiff {
        to_associate: source.difference(target).cloned().collect(),
        to_disassociate: target.difference(source).cloned().collect(),
        unchanged: source.intersection(target).count(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDifference {
    pub id1: String,
    pub id2: String,
    pub name1: Option<String>,
    pub name2: Option<String>,
    /// `New` or `Deleted`; pairs are never modified
    pub difference_type: DifferenceType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipComparisonResult {
    pub relationship: String,
    pub source_count: usize,
    pub target_count: usize,
    pub differences: Vec<AssociationDifference>,
    /// Set when the relationship could not be resolved or read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RelationshipComparisonResult {
    pub fn failed(relationship: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn new_count(&self) -> usize {
        self.differences
            .iter()
            .filter(|d| d.difference_type == DifferenceType::New)
            .count()
    }

    pub fn deleted_count(&self) -> usize {
        self.differences
            .iter()
            .filter(|d| d.difference_type == DifferenceType::Deleted)
            .count()
    }
}

/// Compare two sets of intersect records
pub fn compare_associations(
    relationship: &str,
    source: &RecordSet,
    target: &RecordSet,
    id_field1: &str,
    id_field2: &str,
    names1: &HashMap<String, String>,
    names2: &HashMap<String, String>,
) -> RelationshipComparisonResult {
    let source_pairs = association_pairs(source, id_field1, id_field2);
    let target_pairs = association_pairs(target, id_field1, id_field2);
    let diff = diff_pairs(&source_pairs, &target_pairs);

    let describe = |pair: AssociationPair, kind: DifferenceType| AssociationDifference {
        name1: names1.get(&pair.id1).cloned(),
        name2: names2.get(&pair.id2).cloned(),
        id1: pair.id1,
        id2: pair.id2,
        difference_type: kind,
    };

    let differences = diff
        .to_associate
        .into_iter()
        .map(|p| describe(p, DifferenceType::New))
        .chain(
            diff.to_disassociate
                .into_iter()
                .map(|p| describe(p, DifferenceType::Deleted)),
        )
        .collect();

    RelationshipComparisonResult {
        relationship: relationship.to_string(),
        source_count: source_pairs.len(),
        target_count: target_pairs.len(),
        differences,
        error: None,
    }
}

/// Result of comparing every configured table and relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub source_env: String,
    pub target_env: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tables: Vec<TableComparisonResult>,
    pub relationships: Vec<RelationshipComparisonResult>,
}

impl ComparisonResult {
    pub fn total_differences(&self) -> usize {
        self.tables.iter().map(|t| t.differences.len()).sum::<usize>()
            + self
                .relationships
                .iter()
                .map(|r| r.differences.len())
                .sum::<usize>()
    }

    pub fn has_differences(&self) -> bool {
        self.total_differences() > 0
    }

    /// Relationships that could not be compared
    pub fn has_errors(&self) -> bool {
        self.relationships.iter().any(|r| r.error.is_some())
    }
}

/// Compare one relationship; resolution and retrieval failures are returned
async fn compare_relationship(
    source: &dyn RecordService,
    target: &dyn RecordService,
    config: &ManyToManyConfig,
) -> Result<RelationshipComparisonResult> {
    let metadata = resolve_relationship(target, config).await?;
    log::info!("Comparing relationship {}", metadata.schema_name);

    let source_set = fetch_pairs(source, &metadata).await?;
    let target_set = fetch_pairs(target, &metadata).await?;
    let names1 = endpoint_names(&[source, target], &metadata.entity1).await?;
    let names2 = endpoint_names(&[source, target], &metadata.entity2).await?;

    Ok(compare_associations(
        &metadata.schema_name,
        &source_set,
        &target_set,
        &metadata.entity1_key,
        &metadata.entity2_key,
        &names1,
        &names2,
    ))
}

/// Compare every configured table and relationship between two environments
pub async fn compare_environments(
    source: &dyn RecordService,
    target: &dyn RecordService,
    config: &SyncConfig,
) -> Result<ComparisonResult> {
    config.validate()?;

    let started = Instant::now();
    let mut result = ComparisonResult {
        source_env: source.environment_name().to_string(),
        target_env: target.environment_name().to_string(),
        started_at: Utc::now(),
        duration_ms: 0,
        tables: Vec::new(),
        relationships: Vec::new(),
    };

    for table in &config.tables {
        log::info!("Comparing {}", table.entity);
        let filter = table.filter.as_deref();
        let source_records = source.retrieve_records(&table.entity, filter).await?;
        let target_records = target.retrieve_records(&table.entity, filter).await?;
        result.tables.push(compare_records(
            &table.entity,
            &source_records,
            &target_records,
            &CompareOptions::for_table(table),
        ));
    }

    for relationship in &config.many_to_many {
        let compared = match compare_relationship(source, target, relationship).await {
            Ok(compared) => compared,
            Err(e) => {
                log::warn!("Skipping relationship {}: {:#}", relationship.display_name(), e);
                RelationshipComparisonResult::failed(relationship.display_name(), format!("{:#}", e))
            }
        };
        result.relationships.push(compared);
    }

    result.duration_ms = started.elapsed().as_millis() as u64;
    log::info!(
        "Comparison finished: {} differences in {} ms",
        result.total_differences(),
        result.duration_ms
    );

    Ok(result)
}

/// ID -> display name for an endpoint entity across environments
async fn endpoint_names(
    services: &[&dyn RecordService],
    entity: &str,
) -> Result<HashMap<String, String>> {
    let mut names = HashMap::new();
    for service in services {
        let schema = service.get_schema(entity).await?;
        let records = service.retrieve_records(entity, None).await?;
        for record in records.iter() {
            names
                .entry(record.id.clone())
                .or_insert_with(|| display_name(record, schema.primary_name_attribute.as_deref()));
        }
    }
    Ok(names)
}
