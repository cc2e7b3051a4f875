//! Publish daemon: task queue + worker pool + socket server.
//!
//! Publishes submitted over the socket are acknowledged with a task id and
//! run later on a worker. Retryable failures are re-run as fresh invocations;
//! progress is visible through the `status` and `task` commands.

mod error;
pub mod paths;
pub mod protocol;
pub mod queue;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_publish, request_status, request_stop, request_task, send_request, DaemonClient,
    DaemonRequest, DaemonResponse,
};
pub use queue::{
    OrchestratorExecutor, PublishExecutor, PublishTask, RetryPolicy, TargetSummary, TaskId,
    TaskQueue, TaskRecord, TaskStatus,
};
pub use runtime::{run, serve, start_blocking};
