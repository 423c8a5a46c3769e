use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use refsync::cli::{Cli, Commands, commands};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn load_env_file(cli: &Cli) -> Result<()> {
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
        }
        None => {
            // A missing ./.env is fine, variables may come from the shell
            dotenvy::dotenv().ok();
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    load_env_file(&cli)?;

    match cli.command {
        Commands::Migrate(args) => commands::migrate::execute(args).await,
        Commands::Compare(args) => commands::compare::execute(args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
