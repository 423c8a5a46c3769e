//! Terminal output for run summaries and comparisons

use colored::*;

use crate::sync::compare::{ComparisonResult, DifferenceType};
use crate::sync::types::{MigrationSummary, RunStatus};

/// Maximum errors listed before the rest is only counted
const MAX_LISTED_ERRORS: usize = 20;

fn colored_symbol(kind: DifferenceType) -> ColoredString {
    match kind {
        DifferenceType::New => kind.symbol().green(),
        DifferenceType::Modified => kind.symbol().yellow(),
        DifferenceType::Deleted => kind.symbol().red(),
    }
}

pub fn print_summary(summary: &MigrationSummary) {
    let mode = if summary.dry_run { " (dry run)".yellow().to_string() } else { String::new() };
    println!(
        "\n{} {} -> {}{}",
        "Sync".bold(),
        summary.source_env.cyan(),
        summary.target_env.cyan(),
        mode
    );
    println!();

    println!(
        "  {:<32} {:>8} {:>9} {:>8} {:>7} {:>10} {:>7}",
        "Table".bold(),
        "Source".bold(),
        "Upserted".bold(),
        "Lookups".bold(),
        "State".bold(),
        "Unchanged".bold(),
        "Errors".bold()
    );
    for table in &summary.tables {
        let errors = if table.errors.is_empty() {
            "0".normal()
        } else {
            table.errors.len().to_string().red()
        };
        println!(
            "  {:<32} {:>8} {:>9} {:>8} {:>7} {:>10} {:>7}",
            table.entity,
            table.source_count,
            table.upserted,
            table.lookups_patched,
            table.state_changes,
            table.skipped,
            errors
        );
    }

    if !summary.relationships.is_empty() {
        println!();
        println!(
            "  {:<32} {:>8} {:>9} {:>10} {:>13} {:>7}",
            "Relationship".bold(),
            "Source".bold(),
            "Unchanged".bold(),
            "Associated".bold(),
            "Disassociated".bold(),
            "Errors".bold()
        );
        for relationship in &summary.relationships {
            let errors = if relationship.errors.is_empty() {
                "0".normal()
            } else {
                relationship.errors.len().to_string().red()
            };
            println!(
                "  {:<32} {:>8} {:>9} {:>10} {:>13} {:>7}",
                relationship.relationship,
                relationship.source_count,
                relationship.unchanged,
                relationship.associated,
                relationship.disassociated,
                errors
            );
        }
    }

    let error_count = summary.error_count();
    if error_count > 0 {
        println!("\n{}", "Errors".red().bold());
        for error in summary.errors().take(MAX_LISTED_ERRORS) {
            let id = if error.record_id.is_empty() { "-" } else { error.record_id.as_str() };
            println!(
                "  {} [{}] {}: {}",
                error.scope.bold(),
                error.phase.label(),
                id.dimmed(),
                error.message
            );
        }
        if error_count > MAX_LISTED_ERRORS {
            println!("  ... and {} more", error_count - MAX_LISTED_ERRORS);
        }
    }

    let status = match summary.status() {
        RunStatus::Completed => summary.status().label().green().bold(),
        RunStatus::CompletedWithErrors => summary.status().label().yellow().bold(),
    };
    println!("\n{} in {} ms", status, summary.duration_ms);
}

pub fn print_comparison(result: &ComparisonResult) {
    println!(
        "\n{} {} -> {}",
        "Compare".bold(),
        result.source_env.cyan(),
        result.target_env.cyan()
    );

    for table in &result.tables {
        println!(
            "\n{} ({} source, {} target): {} new, {} modified, {} deleted",
            table.entity.bold(),
            table.source_count,
            table.target_count,
            table.new_count().to_string().green(),
            table.modified_count().to_string().yellow(),
            table.deleted_count().to_string().red()
        );
        for difference in &table.differences {
            println!(
                "  {} {} {}",
                colored_symbol(difference.difference_type),
                difference.display_name,
                difference.record_id.dimmed()
            );
            for field in &difference.field_differences {
                println!(
                    "      {}: {} -> {}",
                    field.field,
                    field.target_value.as_deref().unwrap_or("null").red(),
                    field.source_value.as_deref().unwrap_or("null").green()
                );
            }
        }
    }

    for relationship in &result.relationships {
        if let Some(error) = &relationship.error {
            println!("\n{}: {}", relationship.relationship.bold(), error.red());
            continue;
        }
        println!(
            "\n{} ({} source, {} target pairs): {} new, {} deleted",
            relationship.relationship.bold(),
            relationship.source_count,
            relationship.target_count,
            relationship.new_count().to_string().green(),
            relationship.deleted_count().to_string().red()
        );
        for difference in &relationship.differences {
            println!(
                "  {} {} <-> {}",
                colored_symbol(difference.difference_type),
                difference.name1.as_deref().unwrap_or(&difference.id1),
                difference.name2.as_deref().unwrap_or(&difference.id2)
            );
        }
    }

    let failed = result.relationships.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        println!("\n{} relationships could not be compared", failed.to_string().red().bold());
    }

    let total = result.total_differences();
    if total == 0 {
        println!("\n{}", "No differences".green().bold());
    } else {
        println!("\n{} differences in {} ms", total.to_string().bold(), result.duration_ms);
    }
}
