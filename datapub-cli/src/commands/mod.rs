pub mod daemon;
pub mod init;
pub mod publish;
pub mod siblings;
pub mod snapshot;

use std::path::PathBuf;

use anyhow::{Context, Result};

use datapub_core::{config, PublishConfig};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Config file merged with `DATAPUB_GITHUB_*` overrides.
pub(crate) fn load_config(home: &std::path::Path) -> Result<PublishConfig> {
    let config = config::load_at(home).context("failed to load ~/.datapub/config.yaml")?;
    Ok(config.with_env_overrides())
}
