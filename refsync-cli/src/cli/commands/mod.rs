//! Command handlers

pub mod compare;
pub mod migrate;

use anyhow::{Context, Result};

use super::ConnectionArgs;
use crate::api::DynamicsClient;
use crate::config::{Environment, SyncConfig};

/// Exit code for a run that finished with recorded errors
pub const EXIT_COMPLETED_WITH_ERRORS: u8 = 2;

/// Loaded config plus one client per environment
pub struct Connections {
    pub config: SyncConfig,
    pub source: DynamicsClient,
    pub target: DynamicsClient,
}

impl Connections {
    pub fn open(args: &ConnectionArgs) -> Result<Self> {
        let config = SyncConfig::load(&args.config)?;
        let source = Environment::from_env(&args.source)
            .with_context(|| format!("Source environment '{}' is not configured", args.source))?;
        let target = Environment::from_env(&args.target)
            .with_context(|| format!("Target environment '{}' is not configured", args.target))?;

        if source.url.eq_ignore_ascii_case(&target.url) {
            anyhow::bail!("Source and target point at the same organization: {}", source.url);
        }

        log::info!("Source: {} ({})", source.name, source.url);
        log::info!("Target: {} ({})", target.name, target.url);

        Ok(Self {
            config,
            source: DynamicsClient::new(source),
            target: DynamicsClient::new(target),
        })
    }
}
