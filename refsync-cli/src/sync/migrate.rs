//! Multi-phase migrator
//!
//! Runs preparation for every table, then the per-record passes across all
//! tables in order (flat upsert, lookup patch, state), then N:N
//! reconciliation. Each pass completes for every table before the next one
//! starts, so lookups written in pass 2 always point at rows created in
//! pass 1.

use std::time::Instant;

use super::batch::{BatchExecutor, BatchOutcome};
use super::error::SyncError;
use super::many_to_many::reconcile_relationship;
use super::prepare::{PreparedTable, prepare_table};
use super::types::{MigrationPhase, MigrationSummary, RecordError};
use crate::api::RecordService;
use crate::api::operations::Operation;
use crate::config::SyncConfig;

/// Run-level switches, usually from the command line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Overrides the configured batch size
    pub batch_size: Option<usize>,
    /// Compute every count but submit nothing
    pub dry_run: bool,
    /// Skip target retrieval and treat every source record as new
    pub force: bool,
}

impl MigrationOptions {
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

/// Synchronizes a target environment from a source environment
pub struct Migrator<'a> {
    source: &'a dyn RecordService,
    target: &'a dyn RecordService,
    options: MigrationOptions,
}

impl<'a> Migrator<'a> {
    pub fn new(source: &'a dyn RecordService, target: &'a dyn RecordService, options: MigrationOptions) -> Self {
        Self {
            source,
            target,
            options,
        }
    }

    /// Run every pass and return the aggregated summary.
    ///
    /// Only configuration and preparation failures are returned as errors;
    /// write faults and relationship failures are recorded in the summary.
    pub async fn run(&self, config: &SyncConfig) -> Result<MigrationSummary, SyncError> {
        config.validate()?;
        let batch_size = config.effective_batch_size(self.options.batch_size)?;

        let started = Instant::now();
        let mut summary = MigrationSummary::new(
            self.source.environment_name(),
            self.target.environment_name(),
            self.options.dry_run,
            self.options.force,
        );

        log::info!(
            "Synchronizing {} -> {} ({} tables, {} relationships, batch size {}{}{})",
            summary.source_env,
            summary.target_env,
            config.tables.len(),
            config.many_to_many.len(),
            batch_size,
            if self.options.dry_run { ", dry run" } else { "" },
            if self.options.force { ", force" } else { "" }
        );

        let mut tables = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            tables.push(prepare_table(self.source, self.target, table, self.options.force).await?);
        }

        let executor = BatchExecutor::new(self.target, batch_size);
        let executor = (!self.options.dry_run).then_some(&executor);

        self.flat_pass(&mut tables, executor).await;
        self.reference_pass(&mut tables, executor).await;
        self.state_pass(&mut tables, executor).await;

        summary.tables = tables.into_iter().map(|t| t.result).collect();

        for relationship in &config.many_to_many {
            let result = reconcile_relationship(self.source, self.target, relationship, executor).await;
            summary.relationships.push(result);
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;

        log::info!(
            "{}: {} upserted, {} lookups patched, {} state changes, {} unchanged, {} errors in {}ms",
            summary.status().label(),
            summary.total_upserted(),
            summary.total_lookups_patched(),
            summary.total_state_changes(),
            summary.total_skipped(),
            summary.error_count(),
            summary.duration_ms
        );

        Ok(summary)
    }

    /// Pass 1: flat attributes only, inserting or overwriting rows
    async fn flat_pass(&self, tables: &mut [PreparedTable], executor: Option<&BatchExecutor<'_>>) {
        for table in tables.iter_mut() {
            let entity = table.config.entity.clone();
            let writes = &table.plan.flat_writes;
            if writes.is_empty() {
                continue;
            }
            log::info!("{} {}: {} records", MigrationPhase::Flat, entity, writes.len());

            table.result.upserted = match executor {
                None => writes.len(),
                Some(executor) => {
                    let outcome = executor
                        .execute(&entity, MigrationPhase::Flat, writes, |w| {
                            Operation::upsert(entity.as_str(), w.id.as_str(), w.fields.clone())
                        })
                        .await;
                    absorb(&mut table.result.errors, outcome)
                }
            };
        }
    }

    /// Pass 2: lookup attributes only, against rows that now exist
    async fn reference_pass(&self, tables: &mut [PreparedTable], executor: Option<&BatchExecutor<'_>>) {
        for table in tables.iter_mut() {
            let entity = table.config.entity.clone();
            let writes = &table.plan.reference_writes;
            if writes.is_empty() {
                continue;
            }
            log::info!("{} {}: {} records", MigrationPhase::Reference, entity, writes.len());

            table.result.lookups_patched = match executor {
                None => writes.len(),
                Some(executor) => {
                    let outcome = executor
                        .execute(&entity, MigrationPhase::Reference, writes, |w| {
                            Operation::update(entity.as_str(), w.id.as_str(), w.fields.clone())
                        })
                        .await;
                    absorb(&mut table.result.errors, outcome)
                }
            };
        }
    }

    /// Pass 3: state transitions, last because inactive rows reject updates
    async fn state_pass(&self, tables: &mut [PreparedTable], executor: Option<&BatchExecutor<'_>>) {
        for table in tables.iter_mut() {
            let entity = table.config.entity.clone();
            let writes = &table.plan.state_writes;
            if !table.config.manage_state || writes.is_empty() {
                continue;
            }
            log::info!("{} {}: {} records", MigrationPhase::State, entity, writes.len());

            table.result.state_changes = match executor {
                None => writes.len(),
                Some(executor) => {
                    let outcome = executor
                        .execute(&entity, MigrationPhase::State, writes, |w| {
                            Operation::set_state(entity.as_str(), w.id.as_str(), w.state, w.status)
                        })
                        .await;
                    absorb(&mut table.result.errors, outcome)
                }
            };
        }
    }
}

fn absorb(errors: &mut Vec<RecordError>, outcome: BatchOutcome) -> usize {
    errors.extend(outcome.errors);
    outcome.succeeded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableSyncConfig;

    #[test]
    fn test_options_builders() {
        let options = MigrationOptions::default().dry_run().force().with_batch_size(50);
        assert!(options.dry_run);
        assert!(options.force);
        assert_eq!(options.batch_size, Some(50));
    }

    #[tokio::test]
    async fn test_batch_size_override_wins_over_config() {
        let config = SyncConfig {
            batch_size: 5000,
            tables: vec![TableSyncConfig::new("account")],
            ..Default::default()
        };
        let schema = crate::api::EntitySchema::new("account", "accounts", "accountid");
        let source = crate::api::InMemoryService::new("dev").with_schema(schema.clone());
        let target = crate::api::InMemoryService::new("test").with_schema(schema);

        let rejected = Migrator::new(&source, &target, MigrationOptions::default()).run(&config).await;
        assert!(matches!(rejected, Err(SyncError::Configuration(_))));

        let summary = Migrator::new(&source, &target, MigrationOptions::default().with_batch_size(100))
            .run(&config)
            .await
            .unwrap();
        assert!(!summary.has_errors());
    }
}
