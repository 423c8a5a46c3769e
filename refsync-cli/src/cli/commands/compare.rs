//! `refsync compare`

use std::process::ExitCode;

use anyhow::Result;

use super::{Connections, EXIT_COMPLETED_WITH_ERRORS};
use crate::cli::CompareArgs;
use crate::report;
use crate::sync::compare_environments;

pub async fn execute(args: CompareArgs) -> Result<ExitCode> {
    let connections = Connections::open(&args.connection)?;

    let result = compare_environments(&connections.source, &connections.target, &connections.config).await?;

    report::print_comparison(&result);
    if let Some(path) = &args.json {
        report::write_comparison(&result, path)?;
    }
    if let Some(path) = &args.report {
        report::export_comparison(&result, path)?;
    }

    Ok(if result.has_errors() {
        ExitCode::from(EXIT_COMPLETED_WITH_ERRORS)
    } else {
        ExitCode::SUCCESS
    })
}
