//! `datapub publish <dataset> <snapshot> [--realm ...] [--queue]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use datapub_core::types::TargetOutcome;
use datapub_core::{DatasetId, PublishReport, SnapshotTag};
use datapub_daemon::request_publish;
use datapub_publish::{publish_snapshot, Orchestrator, SiblingResolver};
use datapub_remote::providers_from_config;
use datapub_store::LocalStore;

#[derive(Args, Debug)]
pub struct PublishArgs {
    pub dataset: DatasetId,

    pub snapshot: SnapshotTag,

    /// PRIVATE exports to the private bucket; PUBLIC adds the public bucket
    /// and a hosted-git repository.
    #[arg(long, default_value = "PRIVATE")]
    pub realm: String,

    /// Hand the publish to the running daemon instead of running it here.
    #[arg(long)]
    pub queue: bool,
}

impl PublishArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;

        if self.queue {
            let id = request_publish(&home, &self.dataset.0, &self.snapshot.0, &self.realm)
                .context("failed to submit publish to daemon")?;
            println!("✓ Queued task {id}");
            println!("  Follow it with `datapub daemon task {id}`");
            return Ok(());
        }

        init_tracing();
        let config = super::load_config(&home)?;
        let store = LocalStore::new(&config.store_root);
        let providers = providers_from_config(&config);
        let orchestrator = Orchestrator::new(SiblingResolver::new(
            &config,
            providers.hosted_git,
            providers.object_storage,
        ));

        let report = publish_snapshot(
            &orchestrator,
            &store,
            &self.dataset,
            &self.snapshot,
            &self.realm,
        )
        .with_context(|| format!("publish of {}@{} aborted", self.dataset, self.snapshot))?;

        print_report(&report);
        let summary = if report.aborted().is_some() {
            "publish aborted"
        } else {
            "publish incomplete"
        };
        report.into_result().context(summary)?;
        Ok(())
    }
}

fn print_report(report: &PublishReport) {
    println!(
        "{} {}@{} ({})",
        "Published".bold(),
        report.dataset,
        report.snapshot,
        report.realm
    );
    for result in &report.results {
        match &result.outcome {
            TargetOutcome::Succeeded(receipt) => println!(
                "  {} {:<11} {} ({} written, {} unchanged)",
                "✓".green().bold(),
                result.target.to_string(),
                receipt.url,
                receipt.objects_written,
                receipt.objects_unchanged
            ),
            TargetOutcome::Failed(err) => println!(
                "  {} {:<11} {}",
                "✗".red().bold(),
                result.target.to_string(),
                err
            ),
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
