//! Dynamics 365 metadata models

use serde::{Deserialize, Serialize};

/// Dynamics 365 field metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub logical_name: String,
    /// Schema name with proper casing (e.g., "ParentCustomerId")
    /// Used for @odata.bind annotations
    pub schema_name: Option<String>,
    pub field_type: FieldType,
    /// AttributeMetadata.IsValidForCreate
    pub is_valid_for_create: bool,
    /// AttributeMetadata.IsValidForUpdate
    pub is_valid_for_update: bool,
    /// Target entities for lookups (LookupAttributeMetadata.Targets)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

impl FieldMetadata {
    /// Create a writable field of the given type
    pub fn new(logical_name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            logical_name: logical_name.into(),
            schema_name: None,
            field_type,
            is_valid_for_create: true,
            is_valid_for_update: true,
            targets: Vec::new(),
        }
    }

    /// Create a writable lookup field pointing at `target`
    pub fn lookup(logical_name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut field = Self::new(logical_name, FieldType::Lookup);
        field.targets.push(target.into());
        field
    }

    /// Mark the field as read-only on the remote schema
    pub fn read_only(mut self) -> Self {
        self.is_valid_for_create = false;
        self.is_valid_for_update = false;
        self
    }

    /// Whether the remote API accepts writes to this field at all
    pub fn is_writable(&self) -> bool {
        self.is_valid_for_create || self.is_valid_for_update
    }

    /// Name used for `@odata.bind` annotations
    pub fn bind_name(&self) -> &str {
        self.schema_name.as_deref().unwrap_or(&self.logical_name)
    }
}

/// Field data types in Dynamics 365
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldType {
    String,
    Memo,
    Integer,
    BigInt,
    Decimal,
    Double,
    Boolean,
    DateTime,
    Lookup,
    OptionSet,
    State,
    Status,
    Money,
    UniqueIdentifier,
    ManagedProperty,
    Other(String),
}

impl FieldType {
    /// Map an `AttributeType` value from EntityDefinitions to a field type
    pub fn from_attribute_type(attribute_type: &str) -> Self {
        match attribute_type {
            "String" => Self::String,
            "Memo" => Self::Memo,
            "Integer" => Self::Integer,
            "BigInt" => Self::BigInt,
            "Decimal" => Self::Decimal,
            "Double" => Self::Double,
            "Boolean" => Self::Boolean,
            "DateTime" => Self::DateTime,
            "Lookup" | "Customer" | "Owner" => Self::Lookup,
            "Picklist" => Self::OptionSet,
            "State" => Self::State,
            "Status" => Self::Status,
            "Money" => Self::Money,
            "Uniqueidentifier" => Self::UniqueIdentifier,
            "ManagedProperty" => Self::ManagedProperty,
            other => Self::Other(other.to_string()),
        }
    }

    /// Foreign-key valued field
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Lookup)
    }

    /// Integer-coded choice field
    pub fn is_choice(&self) -> bool {
        matches!(self, Self::OptionSet | Self::State | Self::Status)
    }
}

/// Schema of one entity as seen by the record service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    pub logical_name: String,
    /// Entity set name for OData URLs (e.g., "accounts", "contacts")
    pub entity_set_name: String,
    /// Primary ID attribute name (e.g., "accountid")
    pub primary_id_attribute: String,
    pub primary_name_attribute: Option<String>,
    pub fields: Vec<FieldMetadata>,
}

impl EntitySchema {
    pub fn new(
        logical_name: impl Into<String>,
        entity_set_name: impl Into<String>,
        primary_id_attribute: impl Into<String>,
    ) -> Self {
        Self {
            logical_name: logical_name.into(),
            entity_set_name: entity_set_name.into(),
            primary_id_attribute: primary_id_attribute.into(),
            primary_name_attribute: None,
            fields: Vec::new(),
        }
    }

    pub fn with_primary_name(mut self, name: impl Into<String>) -> Self {
        self.primary_name_attribute = Some(name.into());
        self
    }

    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Find a field by logical name
    pub fn field(&self, logical_name: &str) -> Option<&FieldMetadata> {
        self.fields
            .iter()
            .find(|f| f.logical_name.eq_ignore_ascii_case(logical_name))
    }
}

/// N:N relationship metadata (ManyToManyRelationshipMetadata)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManyMetadata {
    /// Relationship schema name, doubles as the collection navigation property
    pub schema_name: String,
    /// Intersect entity logical name
    pub intersect_entity: String,
    /// Entity1LogicalName
    pub entity1: String,
    /// Entity1IntersectAttribute
    pub entity1_key: String,
    /// Entity2LogicalName
    pub entity2: String,
    /// Entity2IntersectAttribute
    pub entity2_key: String,
}
