use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use tracing::info;

use labgate_common::LabgateConfig;

pub fn load_config(path: &Path) -> Result<LabgateConfig> {
    let mut config: LabgateConfig = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("LABGATE"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    config.paths_relative_to = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_default();

    info!("Using config: {path:?}");
    Ok(config)
}
