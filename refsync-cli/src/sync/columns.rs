//! Column classification for synchronizable attributes
//!
//! Every attribute of an entity lands in exactly one bucket. Only the flat
//! and reference buckets are written by the per-record passes; state control
//! columns are handled by the state pass alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::api::metadata::{EntitySchema, FieldMetadata};

/// System fields that are never synchronized.
/// These are auto-populated by Dynamics 365
pub const SYSTEM_FIELDS: &[&str] = &[
    "createdby",
    "createdon",
    "createdonbehalfby",
    "modifiedby",
    "modifiedon",
    "modifiedonbehalfby",
    "ownerid",
    "owningbusinessunit",
    "owningteam",
    "owninguser",
    "versionnumber",
    "importsequencenumber",
    "overriddencreatedon",
    "timezoneruleversionnumber",
    "utcconversiontimezonecode",
];

pub const STATE_FIELD: &str = "statecode";
pub const STATUS_FIELD: &str = "statuscode";

/// Check if a field name is a system field
pub fn is_system_field(field_name: &str) -> bool {
    SYSTEM_FIELDS
        .iter()
        .any(|f| f.eq_ignore_ascii_case(field_name))
}

/// Check if a field is one of the reserved state/status columns
pub fn is_state_field(field_name: &str) -> bool {
    field_name.eq_ignore_ascii_case(STATE_FIELD) || field_name.eq_ignore_ascii_case(STATUS_FIELD)
}

/// Bucket an attribute belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnBucket {
    SystemMetadata,
    StateControl,
    Flat,
    Reference,
    /// Dropped by the table's include/exclude configuration
    Excluded,
}

/// Partition of one entity's attributes, fixed for the whole run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnClassification {
    pub entity: String,
    pub buckets: HashMap<String, ColumnBucket>,
}

impl ColumnClassification {
    pub fn bucket(&self, name: &str) -> Option<ColumnBucket> {
        self.buckets.get(name).copied()
    }

    /// Attribute names in a bucket, sorted
    pub fn names(&self, bucket: ColumnBucket) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .buckets
            .iter()
            .filter(|(_, b)| **b == bucket)
            .map(|(n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn flat(&self) -> Vec<&str> {
        self.names(ColumnBucket::Flat)
    }

    pub fn reference(&self) -> Vec<&str> {
        self.names(ColumnBucket::Reference)
    }

    pub fn has_state_control(&self) -> bool {
        self.buckets.values().any(|b| *b == ColumnBucket::StateControl)
    }
}

/// Classify a single attribute.
///
/// Returns `None` for the primary key and for attributes the remote schema
/// does not allow writing.
pub fn classify_column(
    field: &FieldMetadata,
    primary_id: &str,
    include_fields: &[String],
    exclude_fields: &[String],
) -> Option<ColumnBucket> {
    let name = field.logical_name.as_str();

    if is_system_field(name) {
        return Some(ColumnBucket::SystemMetadata);
    }
    if is_state_field(name) {
        return Some(ColumnBucket::StateControl);
    }
    if name.eq_ignore_ascii_case(primary_id) || !field.is_writable() {
        return None;
    }
    if contains_name(exclude_fields, name) {
        return Some(ColumnBucket::Excluded);
    }
    if !include_fields.is_empty() && !contains_name(include_fields, name) {
        return Some(ColumnBucket::Excluded);
    }

    if field.field_type.is_reference() {
        Some(ColumnBucket::Reference)
    } else {
        Some(ColumnBucket::Flat)
    }
}

/// Classify every attribute of an entity schema
pub fn classify_columns(
    schema: &EntitySchema,
    include_fields: &[String],
    exclude_fields: &[String],
) -> ColumnClassification {
    let buckets = schema
        .fields
        .iter()
        .filter_map(|field| {
            classify_column(
                field,
                &schema.primary_id_attribute,
                include_fields,
                exclude_fields,
            )
            .map(|bucket| (field.logical_name.clone(), bucket))
        })
        .collect();

    ColumnClassification {
        entity: schema.logical_name.clone(),
        buckets,
    }
}

fn contains_name(list: &[String], name: &str) -> bool {
    list.iter().any(|n| n.eq_ignore_ascii_case(name))
}
