//! `refsync migrate`

use std::process::ExitCode;

use anyhow::Result;

use super::{Connections, EXIT_COMPLETED_WITH_ERRORS};
use crate::cli::MigrateArgs;
use crate::report;
use crate::sync::{MigrationOptions, Migrator, RunStatus};

pub async fn execute(args: MigrateArgs) -> Result<ExitCode> {
    let connections = Connections::open(&args.connection)?;

    let options = MigrationOptions {
        batch_size: args.batch_size,
        dry_run: args.dry_run,
        force: args.force,
    };
    let migrator = Migrator::new(&connections.source, &connections.target, options);
    let summary = migrator.run(&connections.config).await?;

    report::print_summary(&summary);
    if let Some(path) = &args.json {
        report::write_summary(&summary, path)?;
    }
    if let Some(path) = &args.report {
        report::export_summary(&summary, path)?;
    }

    Ok(match summary.status() {
        RunStatus::Completed => ExitCode::SUCCESS,
        RunStatus::CompletedWithErrors => ExitCode::from(EXIT_COMPLETED_WITH_ERRORS),
    })
}
