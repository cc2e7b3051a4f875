//! `datapub snapshot <dataset> <tag>`

use anyhow::{Context, Result};
use clap::Args;

use datapub_core::{DatasetId, SnapshotTag};
use datapub_store::LocalStore;

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Dataset id (a directory under the store root).
    pub dataset: DatasetId,

    /// Tag to create, e.g. 1.0.0.
    pub tag: SnapshotTag,
}

impl SnapshotArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let store = LocalStore::new(&config.store_root);

        let dataset = store
            .open(&self.dataset)
            .with_context(|| format!("cannot open dataset '{}'", self.dataset))?;
        let manifest = dataset
            .create_snapshot(&self.tag)
            .with_context(|| format!("failed to snapshot '{}' as {}", self.dataset, self.tag))?;

        println!(
            "✓ Snapshot {} of '{}' ({} files)",
            manifest.tag,
            self.dataset,
            manifest.files.len()
        );
        Ok(())
    }
}
