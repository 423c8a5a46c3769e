//! Errors that abort a synchronization run

/// Failure that stops a run before it can produce a summary.
///
/// Per-record write faults and relationship resolution failures are not
/// raised through this type; they end up as `RecordError`s in the summary.
#[derive(Debug)]
pub enum SyncError {
    /// Malformed or empty sync configuration
    Configuration(String),
    /// Schema or record retrieval failed for a table
    Preparation {
        entity: String,
        source: anyhow::Error,
    },
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn preparation(entity: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Preparation {
            entity: entity.into(),
            source,
        }
    }
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(message) => write!(f, "Invalid sync configuration: {}", message),
            Self::Preparation { entity, source } => {
                write!(f, "Failed to prepare '{}': {:#}", entity, source)
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Configuration(_) => None,
            Self::Preparation { source, .. } => Some(source.as_ref()),
        }
    }
}
