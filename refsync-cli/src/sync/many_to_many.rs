//! N:N association reconciliation (pass 4)
//!
//! Works on intersect rows reduced to endpoint pairs: pairs missing from the
//! target are associated, pairs the target has beyond the source are
//! disassociated. A relationship that cannot be resolved or read is recorded
//! as a single error and the remaining relationships still run.

use anyhow::{Context, Result};

use super::batch::BatchExecutor;
use super::compare::{AssociationPair, association_pairs, diff_pairs};
use super::record::RecordSet;
use super::types::{ManyToManyMigrationResult, MigrationPhase, RecordError};
use crate::api::RecordService;
use crate::api::metadata::ManyToManyMetadata;
use crate::api::operations::Operation;
use crate::config::{ManyToManyConfig, RelationshipSource};

/// Explicit metadata from config, or a relationship metadata lookup
pub async fn resolve_relationship(
    service: &dyn RecordService,
    config: &ManyToManyConfig,
) -> Result<ManyToManyMetadata> {
    match config.source() {
        Some(RelationshipSource::Explicit(metadata)) => Ok(metadata),
        Some(RelationshipSource::Lookup(name)) => service
            .resolve_many_to_many(name)
            .await
            .with_context(|| format!("Failed to resolve relationship '{}'", name)),
        None => anyhow::bail!(
            "Relationship '{}' has neither a name nor an explicit definition",
            config.display_name()
        ),
    }
}

/// FetchXML selecting both endpoint keys of an intersect entity
pub fn intersect_query(metadata: &ManyToManyMetadata) -> String {
    format!(
        r#"<fetch mapping="logical"><entity name="{}"><attribute name="{}" /><attribute name="{}" /></entity></fetch>"#,
        metadata.intersect_entity, metadata.entity1_key, metadata.entity2_key
    )
}

/// Retrieve the intersect rows of a relationship
pub async fn fetch_pairs(service: &dyn RecordService, metadata: &ManyToManyMetadata) -> Result<RecordSet> {
    service
        .retrieve_records_by_query(&metadata.intersect_entity, &intersect_query(metadata))
        .await
        .with_context(|| {
            format!(
                "Failed to retrieve '{}' associations from {}",
                metadata.schema_name,
                service.environment_name()
            )
        })
}

fn associate(metadata: &ManyToManyMetadata, pair: &AssociationPair) -> Operation {
    Operation::Associate {
        relationship: metadata.schema_name.clone(),
        entity1: metadata.entity1.clone(),
        id1: pair.id1.clone(),
        entity2: metadata.entity2.clone(),
        id2: pair.id2.clone(),
    }
}

fn disassociate(metadata: &ManyToManyMetadata, pair: &AssociationPair) -> Operation {
    Operation::Disassociate {
        relationship: metadata.schema_name.clone(),
        entity1: metadata.entity1.clone(),
        id1: pair.id1.clone(),
        entity2: metadata.entity2.clone(),
        id2: pair.id2.clone(),
    }
}

/// Reconcile one relationship. `executor` is `None` in dry-run mode.
pub async fn reconcile_relationship(
    source: &dyn RecordService,
    target: &dyn RecordService,
    config: &ManyToManyConfig,
    executor: Option<&BatchExecutor<'_>>,
) -> ManyToManyMigrationResult {
    let mut result = ManyToManyMigrationResult::new(config.display_name());

    let metadata = match resolve_relationship(target, config).await {
        Ok(metadata) => metadata,
        Err(e) => {
            log::warn!("Skipping relationship {}: {:#}", config.display_name(), e);
            result.errors.push(RecordError::new(
                config.display_name(),
                "",
                MigrationPhase::Resolve,
                format!("{:#}", e),
            ));
            return result;
        }
    };
    result.relationship = metadata.schema_name.clone();

    let (source_set, target_set) = match (
        fetch_pairs(source, &metadata).await,
        fetch_pairs(target, &metadata).await,
    ) {
        (Ok(s), Ok(t)) => (s, t),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("Skipping relationship {}: {:#}", metadata.schema_name, e);
            result.errors.push(RecordError::new(
                &metadata.schema_name,
                "",
                MigrationPhase::Resolve,
                format!("{:#}", e),
            ));
            return result;
        }
    };

    let source_pairs = association_pairs(&source_set, &metadata.entity1_key, &metadata.entity2_key);
    let target_pairs = association_pairs(&target_set, &metadata.entity1_key, &metadata.entity2_key);
    let diff = diff_pairs(&source_pairs, &target_pairs);

    result.source_count = source_pairs.len();
    result.target_count = target_pairs.len();
    result.unchanged = diff.unchanged;

    log::info!(
        "Relationship {}: {} to associate, {} to disassociate, {} unchanged",
        metadata.schema_name,
        diff.to_associate.len(),
        diff.to_disassociate.len(),
        diff.unchanged
    );

    match executor {
        None => {
            result.associated = diff.to_associate.len();
            result.disassociated = diff.to_disassociate.len();
        }
        Some(executor) => {
            let outcome = executor
                .execute(
                    &metadata.schema_name,
                    MigrationPhase::Associate,
                    &diff.to_associate,
                    |pair| associate(&metadata, pair),
                )
                .await;
            result.associated = outcome.succeeded;
            result.errors.extend(outcome.errors);

            let outcome = executor
                .execute(
                    &metadata.schema_name,
                    MigrationPhase::Disassociate,
                    &diff.to_disassociate,
                    |pair| disassociate(&metadata, pair),
                )
                .await;
            result.disassociated = outcome.succeeded;
            result.errors.extend(outcome.errors);
        }
    }

    result
}
