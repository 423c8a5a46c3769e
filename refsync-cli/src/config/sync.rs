//! Sync configuration: which tables and relationships to synchronize

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::metadata::ManyToManyMetadata;
use crate::sync::error::SyncError;

/// Default number of operations per `$batch` request
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound on operations in a single Dataverse `$batch` request
pub const MAX_BATCH_SIZE: usize = 1000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Top-level sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub tables: Vec<TableSyncConfig>,
    #[serde(default)]
    pub many_to_many: Vec<ManyToManyConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            tables: Vec::new(),
            many_to_many: Vec::new(),
        }
    }
}

/// Per-table sync settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSyncConfig {
    /// Entity logical name
    pub entity: String,
    /// OData `$filter` applied to the source side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Synchronize statecode/statuscode
    #[serde(default)]
    pub manage_state: bool,
    /// Allowlist of fields; empty means all
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    /// Field used to label records in comparison reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_name_field: Option<String>,
    /// Primary key field; when unset the comparator infers key-like names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_id_field: Option<String>,
}

impl TableSyncConfig {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self) -> Self {
        self.manage_state = true;
        self
    }
}

/// An N:N relationship to reconcile.
///
/// Either `relationshipName` alone (resolved through relationship metadata)
/// or the explicit intersect/endpoint description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManyToManyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intersect_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity1_key_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity2: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity2_key_field: Option<String>,
}

/// How a relationship's metadata is obtained
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipSource<'a> {
    Explicit(ManyToManyMetadata),
    Lookup(&'a str),
}

impl ManyToManyConfig {
    /// Relationship resolved through metadata at run time
    pub fn named(relationship: impl Into<String>) -> Self {
        Self {
            relationship_name: Some(relationship.into()),
            ..Default::default()
        }
    }

    pub fn explicit(metadata: &ManyToManyMetadata) -> Self {
        Self {
            relationship_name: None,
            name: Some(metadata.schema_name.clone()),
            intersect_entity: Some(metadata.intersect_entity.clone()),
            entity1: Some(metadata.entity1.clone()),
            entity1_key_field: Some(metadata.entity1_key.clone()),
            entity2: Some(metadata.entity2.clone()),
            entity2_key_field: Some(metadata.entity2_key.clone()),
        }
    }

    /// Display name of the relationship
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.relationship_name.as_deref())
            .unwrap_or("(unnamed)")
    }

    fn explicit_metadata(&self) -> Option<ManyToManyMetadata> {
        Some(ManyToManyMetadata {
            schema_name: self.name.clone()?,
            intersect_entity: self.intersect_entity.clone()?,
            entity1: self.entity1.clone()?,
            entity1_key: self.entity1_key_field.clone()?,
            entity2: self.entity2.clone()?,
            entity2_key: self.entity2_key_field.clone()?,
        })
    }

    fn has_explicit_parts(&self) -> bool {
        self.intersect_entity.is_some()
            || self.entity1.is_some()
            || self.entity1_key_field.is_some()
            || self.entity2.is_some()
            || self.entity2_key_field.is_some()
    }

    /// Explicit description wins over a relationship name
    pub fn source(&self) -> Option<RelationshipSource<'_>> {
        if let Some(metadata) = self.explicit_metadata() {
            return Some(RelationshipSource::Explicit(metadata));
        }
        self.relationship_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(RelationshipSource::Lookup)
    }
}

impl SyncConfig {
    /// Load a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: SyncConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::debug!(
            "Loaded config {} ({} tables, {} relationships)",
            path.display(),
            config.tables.len(),
            config.many_to_many.len()
        );
        Ok(config)
    }

    /// Batch size to run with: the override when given, else the configured one
    pub fn effective_batch_size(&self, override_size: Option<usize>) -> Result<usize, SyncError> {
        let batch_size = override_size.unwrap_or(self.batch_size);
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::configuration(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, batch_size
            )));
        }
        Ok(batch_size)
    }

    /// Reject table and relationship definitions that cannot be run.
    ///
    /// The batch size is checked separately by [`SyncConfig::effective_batch_size`]
    /// since a command-line override may replace it.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.tables.is_empty() && self.many_to_many.is_empty() {
            return Err(SyncError::configuration(
                "no tables or many-to-many relationships configured",
            ));
        }

        let mut seen = HashSet::new();
        for table in &self.tables {
            let entity = table.entity.trim();
            if entity.is_empty() {
                return Err(SyncError::configuration("table with an empty entity name"));
            }
            if !seen.insert(entity.to_lowercase()) {
                return Err(SyncError::configuration(format!(
                    "table '{}' is configured more than once",
                    entity
                )));
            }
            if let Some(field) = table
                .include_fields
                .iter()
                .find(|f| table.exclude_fields.iter().any(|e| e.eq_ignore_ascii_case(f)))
            {
                return Err(SyncError::configuration(format!(
                    "field '{}' on '{}' is both included and excluded",
                    field, entity
                )));
            }
        }

        for relationship in &self.many_to_many {
            if relationship.has_explicit_parts() && relationship.explicit_metadata().is_none() {
                return Err(SyncError::configuration(format!(
                    "relationship '{}' has an incomplete explicit definition",
                    relationship.display_name()
                )));
            }
            if relationship.source().is_none() {
                return Err(SyncError::configuration(
                    "many-to-many entry needs a relationshipName or an explicit definition",
                ));
            }
        }

        Ok(())
    }
}
