//! `datapub init [--force]`

use anyhow::{bail, Context, Result};
use clap::Args;

use datapub_core::{config, PublishConfig};
use datapub_remote::LocalBucketProvider;

/// Write the default configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "{} already exists; pass --force to overwrite",
                path.display()
            );
        }

        let config = PublishConfig::default_at(&home);
        let saved = config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;

        std::fs::create_dir_all(&config.store_root)
            .with_context(|| format!("cannot create {}", config.store_root.display()))?;
        let buckets = LocalBucketProvider::new(&config.object_storage.root);
        for bucket in [
            &config.object_storage.private_bucket,
            &config.object_storage.public_bucket,
        ] {
            buckets
                .create_bucket(bucket)
                .with_context(|| format!("cannot create bucket '{bucket}'"))?;
        }

        println!("✓ Wrote {}", saved.display());
        println!("  Datasets: {}", config.store_root.display());
        println!("  Buckets:  {}", config.object_storage.root.display());
        println!(
            "  Set {}, {} and {} to publish PUBLIC snapshots.",
            config::ENV_GITHUB_LOGIN,
            config::ENV_GITHUB_TOKEN,
            config::ENV_GITHUB_ORG
        );
        Ok(())
    }
}
