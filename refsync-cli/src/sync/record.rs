//! Record snapshots fetched from one environment

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::value::{AttributeValue, EntityReference};
use crate::api::metadata::{EntitySchema, FieldType};

const LOOKUP_LOGICAL_NAME: &str = "@Microsoft.Dynamics.CRM.lookuplogicalname";
const FORMATTED_VALUE: &str = "@OData.Community.Display.V1.FormattedValue";

/// One row of an entity, immutable once fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Entity logical name
    pub entity: String,
    pub attributes: HashMap<String, AttributeValue>,
}

impl Record {
    pub fn new(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// String content of an attribute, for display purposes
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.attributes.get(name) {
            Some(AttributeValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Decode one OData row using the entity schema.
    ///
    /// Lookup columns arrive as `_{name}_value` with annotations carrying the
    /// target entity and formatted name. Other annotation keys are dropped.
    pub fn from_json(schema: &EntitySchema, json: &serde_json::Value) -> Result<Self> {
        let obj = json
            .as_object()
            .context("Record payload is not a JSON object")?;

        let id = obj
            .get(&schema.primary_id_attribute)
            .and_then(|v| v.as_str())
            .with_context(|| {
                format!(
                    "Record of '{}' has no '{}' value",
                    schema.logical_name, schema.primary_id_attribute
                )
            })?
            .to_lowercase();

        let mut record = Record::new(&schema.logical_name, id);

        for (key, value) in obj {
            if key.contains('@') || key == &schema.primary_id_attribute {
                continue;
            }

            if let Some(name) = lookup_column_name(key) {
                let decoded = if value.is_null() {
                    AttributeValue::Null
                } else {
                    let target_type = obj
                        .get(&format!("{}{}", key, LOOKUP_LOGICAL_NAME))
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .or_else(|| {
                            schema
                                .field(name)
                                .and_then(|f| f.targets.first().cloned())
                        })
                        .unwrap_or_default();
                    let target_id = value.as_str().unwrap_or_default().to_lowercase();
                    let mut reference = EntityReference::new(target_type, target_id);
                    reference.display_name = obj
                        .get(&format!("{}{}", key, FORMATTED_VALUE))
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    AttributeValue::Reference(reference)
                };
                record.attributes.insert(name.to_string(), decoded);
                continue;
            }

            let decoded = match schema.field(key).map(|f| &f.field_type) {
                Some(field_type) => decode_typed(field_type, value),
                None => AttributeValue::from_json(value),
            };
            record.attributes.insert(key.clone(), decoded);
        }

        Ok(record)
    }
}

/// `_parentid_value` -> `parentid`
fn lookup_column_name(key: &str) -> Option<&str> {
    key.strip_prefix('_')
        .and_then(|k| k.strip_suffix("_value"))
        .filter(|k| !k.is_empty())
}

fn decode_typed(field_type: &FieldType, value: &serde_json::Value) -> AttributeValue {
    if value.is_null() {
        return AttributeValue::Null;
    }

    match field_type {
        FieldType::OptionSet | FieldType::State | FieldType::Status => value
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(AttributeValue::Choice)
            .unwrap_or_else(|| AttributeValue::from_json(value)),
        FieldType::Money => Decimal::from_str(&value.to_string())
            .or_else(|_| Decimal::from_scientific(&value.to_string()))
            .map(AttributeValue::Money)
            .unwrap_or_else(|_| AttributeValue::from_json(value)),
        FieldType::ManagedProperty => value
            .get("Value")
            .and_then(|v| v.as_bool())
            .map(AttributeValue::ManagedBoolean)
            .unwrap_or_else(|| AttributeValue::from_json(value)),
        FieldType::Boolean => value
            .as_bool()
            .map(AttributeValue::Bool)
            .unwrap_or_else(|| AttributeValue::from_json(value)),
        FieldType::DateTime => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| AttributeValue::DateTime(dt.with_timezone(&Utc)))
            .unwrap_or_else(|| AttributeValue::from_json(value)),
        FieldType::String | FieldType::Memo | FieldType::UniqueIdentifier => value
            .as_str()
            .map(|s| AttributeValue::String(s.to_string()))
            .unwrap_or_else(|| AttributeValue::from_json(value)),
        _ => AttributeValue::from_json(value),
    }
}

/// Records of one entity from one environment, unique by ID
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSet {
    pub entity: String,
    records: HashMap<String, Record>,
    /// Insertion order, for deterministic iteration
    order: Vec<String>,
}

impl RecordSet {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            records: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn from_records(entity: impl Into<String>, records: impl IntoIterator<Item = Record>) -> Self {
        let mut set = Self::new(entity);
        for record in records {
            set.insert(record);
        }
        set
    }

    /// Insert a record, replacing any earlier record with the same ID
    pub fn insert(&mut self, record: Record) {
        if !self.records.contains_key(&record.id) {
            self.order.push(record.id.clone());
        }
        self.records.insert(record.id.clone(), record);
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let removed = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}
