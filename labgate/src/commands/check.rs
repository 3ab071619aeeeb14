use anyhow::{anyhow, Result};
use tracing::info;

use crate::config::load_config;
use crate::Cli;

pub async fn command(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    config.validate().map_err(|e| anyhow!(e))?;
    info!("No problems found");
    Ok(())
}
