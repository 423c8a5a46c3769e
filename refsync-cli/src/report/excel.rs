//! Excel reports for migration runs and environment comparisons

use std::path::Path;

use anyhow::{Context, Result};
use rust_xlsxwriter::*;

use crate::sync::compare::{ComparisonResult, DifferenceType};
use crate::sync::types::MigrationSummary;

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0x4472C4))
        .set_font_color(Color::White)
}

fn title_format() -> Format {
    Format::new().set_bold().set_font_size(16)
}

fn error_format() -> Format {
    Format::new().set_background_color(Color::RGB(0xFF6B6B))
}

fn write_headers(sheet: &mut Worksheet, headers: &[&str]) -> Result<()> {
    let format = header_format();
    for (col, header) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &format)?;
    }
    Ok(())
}

fn save(mut workbook: Workbook, path: &Path) -> Result<()> {
    workbook
        .save(path)
        .with_context(|| format!("Failed to save Excel file: {}", path.display()))?;
    log::info!("Excel report exported to: {}", path.display());
    Ok(())
}

/// Export a migration summary: overview, per-table counters and errors
pub fn export_summary(summary: &MigrationSummary, path: impl AsRef<Path>) -> Result<()> {
    let mut workbook = Workbook::new();

    summary_sheet(&mut workbook, summary)?;
    tables_sheet(&mut workbook, summary)?;
    relationships_sheet(&mut workbook, summary)?;
    errors_sheet(&mut workbook, summary)?;

    save(workbook, path.as_ref())
}

fn summary_sheet(workbook: &mut Workbook, summary: &MigrationSummary) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Summary")?;

    let bold = Format::new().set_bold();

    sheet.write_string_with_format(
        0,
        0,
        format!("Reference Data Sync: {} -> {}", summary.source_env, summary.target_env),
        &title_format(),
    )?;
    sheet.write_string(
        1,
        0,
        format!("Started: {}", summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
    )?;

    let mut row = 3u32;
    sheet.write_string_with_format(row, 0, "Metric", &bold)?;
    sheet.write_string_with_format(row, 1, "Value", &bold)?;
    row += 1;

    let texts = [
        ("Status", summary.status().label().to_string()),
        ("Mode", mode_label(summary).to_string()),
    ];
    for (label, value) in texts {
        sheet.write_string(row, 0, label)?;
        sheet.write_string(row, 1, value)?;
        row += 1;
    }

    let counts = [
        ("Tables", summary.tables.len()),
        ("Relationships", summary.relationships.len()),
        ("Records Upserted", summary.total_upserted()),
        ("Lookups Patched", summary.total_lookups_patched()),
        ("State Changes", summary.total_state_changes()),
        ("Unchanged", summary.total_skipped()),
        ("Errors", summary.error_count()),
    ];
    for (label, value) in counts {
        sheet.write_string(row, 0, label)?;
        sheet.write_number(row, 1, value as f64)?;
        row += 1;
    }

    sheet.write_string(row, 0, "Duration (ms)")?;
    sheet.write_number(row, 1, summary.duration_ms as f64)?;

    sheet.autofit();
    Ok(())
}

fn mode_label(summary: &MigrationSummary) -> &'static str {
    match (summary.dry_run, summary.force) {
        (true, true) => "Dry run (force)",
        (true, false) => "Dry run",
        (false, true) => "Force",
        (false, false) => "Diff",
    }
}

fn tables_sheet(workbook: &mut Workbook, summary: &MigrationSummary) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Tables")?;
    write_headers(
        sheet,
        &["Entity", "Source Records", "Upserted", "Lookups Patched", "State Changes", "Unchanged", "Errors"],
    )?;

    for (i, table) in summary.tables.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &table.entity)?;
        let values = [
            table.source_count,
            table.upserted,
            table.lookups_patched,
            table.state_changes,
            table.skipped,
            table.errors.len(),
        ];
        for (col, value) in values.into_iter().enumerate() {
            sheet.write_number(row, col as u16 + 1, value as f64)?;
        }
    }

    sheet.autofit();
    Ok(())
}

fn relationships_sheet(workbook: &mut Workbook, summary: &MigrationSummary) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Relationships")?;
    write_headers(
        sheet,
        &["Relationship", "Source Pairs", "Target Pairs", "Unchanged", "Associated", "Disassociated", "Errors"],
    )?;

    for (i, relationship) in summary.relationships.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &relationship.relationship)?;
        let values = [
            relationship.source_count,
            relationship.target_count,
            relationship.unchanged,
            relationship.associated,
            relationship.disassociated,
            relationship.errors.len(),
        ];
        for (col, value) in values.into_iter().enumerate() {
            sheet.write_number(row, col as u16 + 1, value as f64)?;
        }
    }

    sheet.autofit();
    Ok(())
}

fn errors_sheet(workbook: &mut Workbook, summary: &MigrationSummary) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Errors")?;
    write_headers(sheet, &["Scope", "Phase", "Record ID", "Error"])?;

    if summary.error_count() == 0 {
        sheet.write_string(1, 0, "No errors recorded")?;
    }

    let format = error_format();
    for (i, error) in summary.errors().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string_with_format(row, 0, &error.scope, &format)?;
        sheet.write_string_with_format(row, 1, error.phase.label(), &format)?;
        sheet.write_string_with_format(row, 2, &error.record_id, &format)?;
        sheet.write_string_with_format(row, 3, &error.message, &format)?;
    }

    sheet.autofit();
    Ok(())
}

/// Export a comparison: overview, record differences and association differences
pub fn export_comparison(result: &ComparisonResult, path: impl AsRef<Path>) -> Result<()> {
    let mut workbook = Workbook::new();

    comparison_summary_sheet(&mut workbook, result)?;
    differences_sheet(&mut workbook, result)?;
    associations_sheet(&mut workbook, result)?;

    save(workbook, path.as_ref())
}

fn comparison_summary_sheet(workbook: &mut Workbook, result: &ComparisonResult) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Summary")?;

    sheet.write_string_with_format(
        0,
        0,
        format!("Reference Data Comparison: {} -> {}", result.source_env, result.target_env),
        &title_format(),
    )?;
    sheet.write_string(
        1,
        0,
        format!("Generated: {}", result.started_at.format("%Y-%m-%d %H:%M:%S UTC")),
    )?;

    let header = header_format();
    let mut row = 3u32;
    for (col, label) in ["Table", "Source", "Target", "New", "Modified", "Deleted", "Error"]
        .iter()
        .enumerate()
    {
        sheet.write_string_with_format(row, col as u16, *label, &header)?;
    }
    row += 1;

    for table in &result.tables {
        sheet.write_string(row, 0, &table.entity)?;
        let values = [
            table.source_count,
            table.target_count,
            table.new_count(),
            table.modified_count(),
            table.deleted_count(),
        ];
        for (col, value) in values.into_iter().enumerate() {
            sheet.write_number(row, col as u16 + 1, value as f64)?;
        }
        row += 1;
    }

    for relationship in &result.relationships {
        sheet.write_string(row, 0, &relationship.relationship)?;
        let values = [
            relationship.source_count,
            relationship.target_count,
            relationship.new_count(),
            0,
            relationship.deleted_count(),
        ];
        for (col, value) in values.into_iter().enumerate() {
            sheet.write_number(row, col as u16 + 1, value as f64)?;
        }
        if let Some(error) = &relationship.error {
            sheet.write_string_with_format(row, 6, error, &error_format())?;
        }
        row += 1;
    }

    sheet.autofit();
    Ok(())
}

fn difference_format(kind: DifferenceType) -> Format {
    let color = match kind {
        DifferenceType::New => 0xC6EFCE,
        DifferenceType::Modified => 0xFFEB9C,
        DifferenceType::Deleted => 0xFFC7CE,
    };
    Format::new().set_background_color(Color::RGB(color))
}

fn differences_sheet(workbook: &mut Workbook, result: &ComparisonResult) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Differences")?;
    write_headers(
        sheet,
        &["Table", "Record ID", "Name", "Difference", "Field", "Source Value", "Target Value"],
    )?;

    let mut row = 1u32;
    for table in &result.tables {
        for difference in &table.differences {
            let format = difference_format(difference.difference_type);
            let write_prefix = |sheet: &mut Worksheet, row: u32| -> Result<()> {
                sheet.write_string_with_format(row, 0, &table.entity, &format)?;
                sheet.write_string_with_format(row, 1, &difference.record_id, &format)?;
                sheet.write_string_with_format(row, 2, &difference.display_name, &format)?;
                sheet.write_string_with_format(row, 3, difference.difference_type.label(), &format)?;
                Ok(())
            };

            if difference.field_differences.is_empty() {
                write_prefix(sheet, row)?;
                row += 1;
                continue;
            }

            for field in &difference.field_differences {
                write_prefix(sheet, row)?;
                sheet.write_string(row, 4, &field.field)?;
                sheet.write_string(row, 5, field.source_value.as_deref().unwrap_or(""))?;
                sheet.write_string(row, 6, field.target_value.as_deref().unwrap_or(""))?;
                row += 1;
            }
        }
    }

    if row == 1 {
        sheet.write_string(1, 0, "No record differences")?;
    }

    sheet.autofit();
    Ok(())
}

fn associations_sheet(workbook: &mut Workbook, result: &ComparisonResult) -> Result<()> {
    let sheet = workbook.add_worksheet();
    sheet.set_name("Associations")?;
    write_headers(
        sheet,
        &["Relationship", "Difference", "ID 1", "Name 1", "ID 2", "Name 2"],
    )?;

    let mut row = 1u32;
    for relationship in &result.relationships {
        for difference in &relationship.differences {
            let format = difference_format(difference.difference_type);
            sheet.write_string_with_format(row, 0, &relationship.relationship, &format)?;
            sheet.write_string_with_format(row, 1, difference.difference_type.label(), &format)?;
            sheet.write_string_with_format(row, 2, &difference.id1, &format)?;
            sheet.write_string_with_format(row, 3, difference.name1.as_deref().unwrap_or(""), &format)?;
            sheet.write_string_with_format(row, 4, &difference.id2, &format)?;
            sheet.write_string_with_format(row, 5, difference.name2.as_deref().unwrap_or(""), &format)?;
            row += 1;
        }
    }

    if row == 1 {
        sheet.write_string(1, 0, "No association differences")?;
    }

    sheet.autofit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::compare::{
        FieldDifference, RecordDifference, RelationshipComparisonResult, TableComparisonResult,
    };
    use crate::sync::types::{MigrationPhase, RecordError, TableMigrationResult};

    #[test]
    fn test_export_summary_creates_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.xlsx");

        let mut summary = MigrationSummary::new("dev", "test", false, true);
        let mut table = TableMigrationResult::new("account", 2);
        table.upserted = 1;
        table
            .errors
            .push(RecordError::new("account", "b", MigrationPhase::Flat, "Duplicate"));
        summary.tables.push(table);

        export_summary(&summary, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }

    #[test]
    fn test_export_comparison_creates_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comparison.xlsx");

        let result = ComparisonResult {
            source_env: "dev".to_string(),
            target_env: "test".to_string(),
            started_at: chrono::Utc::now(),
            duration_ms: 5,
            tables: vec![TableComparisonResult {
                entity: "account".to_string(),
                source_count: 2,
                target_count: 2,
                differences: vec![RecordDifference {
                    record_id: "a".to_string(),
                    display_name: "Alice".to_string(),
                    difference_type: DifferenceType::Modified,
                    field_differences: vec![FieldDifference {
                        field: "name".to_string(),
                        source_value: Some("Alice".to_string()),
                        target_value: Some("Alicia".to_string()),
                    }],
                }],
            }],
            relationships: vec![RelationshipComparisonResult::failed(
                "nrq_missing",
                "Relationship 'nrq_missing' not found",
            )],
        };

        export_comparison(&result, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_mode_label() {
        let summary = MigrationSummary::new("a", "b", true, false);
        assert_eq!(mode_label(&summary), "Dry run");
    }
}
