//! JSON report files

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::sync::compare::ComparisonResult;
use crate::sync::types::MigrationSummary;

fn write_pretty<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write JSON report: {}", path.display()))?;
    log::info!("JSON report written to: {}", path.display());
    Ok(())
}

pub fn write_summary(summary: &MigrationSummary, path: impl AsRef<Path>) -> Result<()> {
    write_pretty(summary, path.as_ref())
}

pub fn write_comparison(result: &ComparisonResult, path: impl AsRef<Path>) -> Result<()> {
    write_pretty(result, path.as_ref())
}
