//! # datapub-publish
//!
//! The publish pipeline shared by the CLI and the daemon.
//!
//! - [`SiblingResolver`] finds or provisions the sibling for a target.
//! - [`publisher::publish`] transfers a snapshot to a resolved sibling.
//! - [`Orchestrator`] walks the targets a realm requires.
//!
//! Call [`publish_snapshot`] to run one invocation against a store.

pub mod orchestrator;
pub mod publisher;
pub mod resolver;

pub use orchestrator::{publish_snapshot, Orchestrator};
pub use resolver::SiblingResolver;
