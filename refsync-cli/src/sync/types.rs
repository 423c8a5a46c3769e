//! Result types produced by a synchronization run
//!
//! Each table and relationship owns its result accumulator; the migrator
//! merges them into the run summary once their passes are done.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase a write belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    /// Pass 1: flat attribute upsert
    Flat,
    /// Pass 2: lookup patch
    Reference,
    /// Pass 3: state/status transition
    State,
    /// Pass 4: N:N metadata lookup and pair retrieval
    Resolve,
    /// Pass 4: associate missing pairs
    Associate,
    /// Pass 4: disassociate extra pairs
    Disassociate,
}

impl MigrationPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Flat => "flat-upsert",
            Self::Reference => "lookup-patch",
            Self::State => "state",
            Self::Resolve => "resolve",
            Self::Associate => "associate",
            Self::Disassociate => "disassociate",
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single per-item failure, recorded and never retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    /// Entity or relationship name
    pub scope: String,
    pub record_id: String,
    pub phase: MigrationPhase,
    pub message: String,
}

impl RecordError {
    pub fn new(
        scope: impl Into<String>,
        record_id: impl Into<String>,
        phase: MigrationPhase,
        message: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            record_id: record_id.into(),
            phase,
            message: message.into(),
        }
    }
}

/// Counters for one table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableMigrationResult {
    pub entity: String,
    pub source_count: usize,
    pub upserted: usize,
    pub lookups_patched: usize,
    pub state_changes: usize,
    pub skipped: usize,
    pub errors: Vec<RecordError>,
}

impl TableMigrationResult {
    pub fn new(entity: impl Into<String>, source_count: usize) -> Self {
        Self {
            entity: entity.into(),
            source_count,
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Counters for one N:N relationship
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManyToManyMigrationResult {
    pub relationship: String,
    /// Pairs in the source environment
    pub source_count: usize,
    /// Pairs in the target environment before the run
    pub target_count: usize,
    /// Pairs present on both sides
    pub unchanged: usize,
    pub associated: usize,
    pub disassociated: usize,
    pub errors: Vec<RecordError>,
}

impl ManyToManyMigrationResult {
    pub fn new(relationship: impl Into<String>) -> Self {
        Self {
            relationship: relationship.into(),
            ..Default::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::CompletedWithErrors => "Completed with errors",
        }
    }
}

/// Aggregate of every table and relationship result for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub source_env: String,
    pub target_env: String,
    pub dry_run: bool,
    pub force: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tables: Vec<TableMigrationResult>,
    pub relationships: Vec<ManyToManyMigrationResult>,
}

impl MigrationSummary {
    pub fn new(source_env: impl Into<String>, target_env: impl Into<String>, dry_run: bool, force: bool) -> Self {
        Self {
            source_env: source_env.into(),
            target_env: target_env.into(),
            dry_run,
            force,
            started_at: Utc::now(),
            duration_ms: 0,
            tables: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        self.tables.iter().any(|t| t.has_errors())
            || self.relationships.iter().any(|r| r.has_errors())
    }

    pub fn status(&self) -> RunStatus {
        if self.has_errors() {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        }
    }

    /// All recorded errors, tables first
    pub fn errors(&self) -> impl Iterator<Item = &RecordError> {
        self.tables
            .iter()
            .flat_map(|t| t.errors.iter())
            .chain(self.relationships.iter().flat_map(|r| r.errors.iter()))
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn table(&self, entity: &str) -> Option<&TableMigrationResult> {
        self.tables.iter().find(|t| t.entity == entity)
    }

    pub fn relationship(&self, name: &str) -> Option<&ManyToManyMigrationResult> {
        self.relationships.iter().find(|r| r.relationship == name)
    }

    pub fn total_upserted(&self) -> usize {
        self.tables.iter().map(|t| t.upserted).sum()
    }

    pub fn total_lookups_patched(&self) -> usize {
        self.tables.iter().map(|t| t.lookups_patched).sum()
    }

    pub fn total_state_changes(&self) -> usize {
        self.tables.iter().map(|t| t.state_changes).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.tables.iter().map(|t| t.skipped).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_errors() {
        let mut summary = MigrationSummary::new("dev", "test", false, false);
        summary.tables.push(TableMigrationResult::new("account", 3));
        summary
            .relationships
            .push(ManyToManyMigrationResult::new("account_leads"));
        assert_eq!(summary.status(), RunStatus::Completed);

        summary.relationships[0].errors.push(RecordError::new(
            "account_leads",
            "",
            MigrationPhase::Resolve,
            "not found",
        ));
        assert!(summary.has_errors());
        assert_eq!(summary.status(), RunStatus::CompletedWithErrors);
        assert_eq!(summary.error_count(), 1);
    }

    #[test]
    fn test_phase_labels_are_unique() {
        let phases = [
            MigrationPhase::Flat,
            MigrationPhase::Reference,
            MigrationPhase::State,
            MigrationPhase::Resolve,
            MigrationPhase::Associate,
            MigrationPhase::Disassociate,
        ];
        let labels: std::collections::HashSet<_> = phases.iter().map(|p| p.label()).collect();
        assert_eq!(labels.len(), phases.len());
    }
}
