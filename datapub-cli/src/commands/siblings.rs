//! `datapub siblings <dataset> [--json]`

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use datapub_core::types::RemoteKind;
use datapub_core::{Dataset, DatasetId};
use datapub_store::LocalStore;

#[derive(Args, Debug)]
pub struct SiblingsArgs {
    pub dataset: DatasetId,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SiblingRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "url")]
    url: String,
    #[tabled(rename = "bucket")]
    bucket: String,
}

impl SiblingsArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let config = super::load_config(&home)?;
        let store = LocalStore::new(&config.store_root);
        let dataset = store
            .open(&self.dataset)
            .with_context(|| format!("cannot open dataset '{}'", self.dataset))?;
        let siblings = dataset.siblings().context("failed to read siblings")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&siblings).context("failed to render siblings JSON")?
            );
            return Ok(());
        }

        if siblings.is_empty() {
            println!("No siblings registered on '{}'.", self.dataset);
            return Ok(());
        }

        let rows: Vec<SiblingRow> = siblings
            .into_iter()
            .map(|s| SiblingRow {
                name: s.name.0,
                kind: match s.config.kind {
                    RemoteKind::Git => "git",
                    RemoteKind::SpecialRemote => "special-remote",
                },
                url: s.config.url,
                bucket: s.config.bucket.unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
