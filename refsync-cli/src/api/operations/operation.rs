//! Write operations submitted to Dynamics 365 in batches

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sync::value::AttributeValue;

/// Attribute payload of a write, ordered for stable request bodies
pub type Fields = BTreeMap<String, AttributeValue>;

/// Represents a single write that can be executed against Dynamics 365
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Create or update a record by primary key
    /// PATCH /entities(id)
    Upsert {
        /// Entity logical name
        entity: String,
        /// Record ID (GUID), preserved across environments
        id: String,
        fields: Fields,
    },
    /// Update an existing record, never creating it
    /// PATCH /entities(id) with If-Match: *
    Update {
        entity: String,
        id: String,
        fields: Fields,
    },
    /// Set statecode/statuscode on an existing record
    SetState {
        entity: String,
        id: String,
        state: i32,
        status: i32,
    },
    /// Associate records via navigation property (N:N relationships using $ref)
    /// POST /entity1s(id1)/relationship/$ref with body {"@odata.id": "/entity2s(id2)"}
    Associate {
        /// Relationship schema name, used as the navigation property
        relationship: String,
        entity1: String,
        id1: String,
        entity2: String,
        id2: String,
    },
    /// Remove an N:N association
    /// DELETE /entity1s(id1)/relationship(id2)/$ref
    Disassociate {
        relationship: String,
        entity1: String,
        id1: String,
        entity2: String,
        id2: String,
    },
}

impl Operation {
    pub fn upsert(entity: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        Self::Upsert {
            entity: entity.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn update(entity: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        Self::Update {
            entity: entity.into(),
            id: id.into(),
            fields,
        }
    }

    pub fn set_state(entity: impl Into<String>, id: impl Into<String>, state: i32, status: i32) -> Self {
        Self::SetState {
            entity: entity.into(),
            id: id.into(),
            state,
            status,
        }
    }

    /// Get the entity (or relationship) name for this operation
    pub fn entity(&self) -> &str {
        match self {
            Self::Upsert { entity, .. } => entity,
            Self::Update { entity, .. } => entity,
            Self::SetState { entity, .. } => entity,
            Self::Associate { relationship, .. } => relationship,
            Self::Disassociate { relationship, .. } => relationship,
        }
    }

    /// Identifier reported when this operation faults
    pub fn record_id(&self) -> String {
        match self {
            Self::Upsert { id, .. } | Self::Update { id, .. } | Self::SetState { id, .. } => {
                id.clone()
            }
            Self::Associate { id1, id2, .. } | Self::Disassociate { id1, id2, .. } => {
                format!("{}:{}", id1, id2)
            }
        }
    }

    /// Get the HTTP method for this operation
    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "PATCH",
            Self::Update { .. } => "PATCH",
            Self::SetState { .. } => "PATCH",
            Self::Associate { .. } => "POST",
            Self::Disassociate { .. } => "DELETE",
        }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Upsert { .. } => "upsert",
            Self::Update { .. } => "update",
            Self::SetState { .. } => "set_state",
            Self::Associate { .. } => "associate",
            Self::Disassociate { .. } => "disassociate",
        }
    }
}

/// Result of one operation inside a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Position of the operation in the submitted batch
    pub index: usize,
    pub success: bool,
    /// Error message if the operation failed
    pub error: Option<String>,
    /// HTTP status code from the response
    pub status_code: Option<u16>,
}

impl OperationResult {
    pub fn success(index: usize, status_code: Option<u16>) -> Self {
        Self {
            index,
            success: true,
            error: None,
            status_code,
        }
    }

    pub fn error(index: usize, error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            index,
            success: false,
            error: Some(error.into()),
            status_code,
        }
    }

    pub fn is_error(&self) -> bool {
        !self.success
    }
}

/// Response to a `$batch` submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Whether any item faulted
    pub faulted: bool,
    pub results: Vec<OperationResult>,
}

impl BatchResponse {
    pub fn from_results(results: Vec<OperationResult>) -> Self {
        Self {
            faulted: results.iter().any(OperationResult::is_error),
            results,
        }
    }

    /// Faulted items as (index, message)
    pub fn faults(&self) -> impl Iterator<Item = (usize, &str)> {
        self.results.iter().filter(|r| r.is_error()).map(|r| {
            (
                r.index,
                r.error.as_deref().unwrap_or("Unknown error"),
            )
        })
    }

    pub fn fault_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_error()).count()
    }
}
