//! datapub: publish dataset snapshots to object storage and hosted git.
//!
//! # Usage
//!
//! ```text
//! datapub init [--force]
//! datapub snapshot <dataset> <tag>
//! datapub siblings <dataset> [--json]
//! datapub publish <dataset> <snapshot> [--realm PRIVATE|PUBLIC] [--queue]
//! datapub daemon start|stop|status|task <id>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, init::InitArgs, publish::PublishArgs, siblings::SiblingsArgs,
    snapshot::SnapshotArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "datapub",
    version,
    about = "Publish dataset snapshots to object storage and hosted git",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default ~/.datapub/config.yaml and create the default buckets.
    Init(InitArgs),

    /// Freeze a dataset's working tree as a snapshot tag.
    Snapshot(SnapshotArgs),

    /// List the siblings registered on a dataset.
    Siblings(SiblingsArgs),

    /// Publish a snapshot to the targets of a realm.
    Publish(PublishArgs),

    /// Run or talk to the background publish daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Snapshot(args) => args.run(),
        Commands::Siblings(args) => args.run(),
        Commands::Publish(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
