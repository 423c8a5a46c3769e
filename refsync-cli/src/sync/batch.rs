//! Batch executor: fixed-size, sequential, continue-on-error submission

use super::types::{MigrationPhase, RecordError};
use crate::api::RecordService;
use crate::api::operations::Operation;

/// Outcome of executing one phase for one table or relationship
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    /// Number of `$batch` requests submitted
    pub batches: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub errors: Vec<RecordError>,
}

/// Split operations into consecutive batches of at most `batch_size`
pub fn chunk_operations(operations: Vec<Operation>, batch_size: usize) -> Vec<Vec<Operation>> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(operations.len().div_ceil(size));
    let mut iter = operations.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

/// Submits writes to the target environment one batch at a time
pub struct BatchExecutor<'a> {
    service: &'a dyn RecordService,
    batch_size: usize,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(service: &'a dyn RecordService, batch_size: usize) -> Self {
        Self {
            service,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Build one operation per item and submit them in batches.
    ///
    /// Batches are awaited one after the other. A faulted item becomes a
    /// `RecordError`; the rest of its batch still counts as succeeded. A
    /// batch that fails as a whole (transport error) faults every item in it
    /// and execution moves on to the next batch.
    pub async fn execute<T>(
        &self,
        scope: &str,
        phase: MigrationPhase,
        items: &[T],
        build: impl Fn(&T) -> Operation,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if items.is_empty() {
            return outcome;
        }

        let operations: Vec<Operation> = items.iter().map(build).collect();
        let batches = chunk_operations(operations, self.batch_size);
        let total_batches = batches.len();

        for (idx, batch) in batches.into_iter().enumerate() {
            log::debug!(
                "{} {} (batch {}/{}, {} operations)",
                phase,
                scope,
                idx + 1,
                total_batches,
                batch.len()
            );

            outcome.batches += 1;
            outcome.submitted += batch.len();

            match self.service.execute_batch(&batch, true).await {
                Ok(response) => {
                    let mut faulted = 0;
                    for (index, message) in response.faults() {
                        let record_id = batch
                            .get(index)
                            .map(Operation::record_id)
                            .unwrap_or_default();
                        log::warn!("{} {} {} failed: {}", phase, scope, record_id, message);
                        outcome
                            .errors
                            .push(RecordError::new(scope, record_id, phase, message));
                        faulted += 1;
                    }
                    outcome.succeeded += batch.len().saturating_sub(faulted);
                }
                Err(e) => {
                    log::warn!(
                        "{} {} batch {}/{} failed: {:#}",
                        phase,
                        scope,
                        idx + 1,
                        total_batches,
                        e
                    );
                    let message = format!("Batch request failed: {:#}", e);
                    outcome.errors.extend(
                        batch
                            .iter()
                            .map(|op| RecordError::new(scope, op.record_id(), phase, message.clone())),
                    );
                }
            }
        }

        outcome
    }
}
