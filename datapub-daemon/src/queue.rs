//! Publish task queue and worker pool.
//!
//! [`TaskQueue::enqueue`] validates the request, records it as `Queued` and
//! returns at once. Workers run each task on the blocking pool. A retryable
//! failure schedules a fresh invocation after `retry_backoff_ms * attempt`
//! until `max_attempts` is reached; fatal failures are never retried.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};

use datapub_core::types::{TargetOutcome, TargetState};
use datapub_core::{
    DaemonConfig, DatasetId, DatasetStore, PublishError, PublishReport, Realm, SnapshotTag,
    TargetId,
};
use datapub_publish::{publish_snapshot, Orchestrator};

use crate::error::DaemonError;

// ---------------------------------------------------------------------------
// Task records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// One invocation's worth of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTask {
    pub id: TaskId,
    pub dataset: DatasetId,
    pub snapshot: SnapshotTag,
    pub realm: Realm,
    pub attempt: u32,
}

/// Outcome of one target in the latest attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSummary {
    pub target: TargetId,
    pub state: TargetState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TargetSummary {
    fn from_report(report: &PublishReport) -> Vec<TargetSummary> {
        report
            .results
            .iter()
            .map(|r| TargetSummary {
                target: r.target,
                state: r.outcome.state(),
                error: match &r.outcome {
                    TargetOutcome::Succeeded(_) => None,
                    TargetOutcome::Failed(err) => Some(err.to_string()),
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub dataset: DatasetId,
    pub snapshot: SnapshotTag,
    pub realm: Realm,
    pub status: TaskStatus,
    pub attempts: u32,
    pub targets: Vec<TargetSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub type TaskTable = Arc<RwLock<BTreeMap<TaskId, TaskRecord>>>;

// ---------------------------------------------------------------------------
// Execution seam
// ---------------------------------------------------------------------------

/// Runs one publish invocation. Called from the blocking pool.
pub trait PublishExecutor: Send + Sync + 'static {
    fn execute(&self, task: &PublishTask) -> Result<PublishReport, PublishError>;
}

/// Executes tasks with the publish orchestrator against a dataset store.
pub struct OrchestratorExecutor {
    orchestrator: Orchestrator,
    store: Arc<dyn DatasetStore>,
}

impl OrchestratorExecutor {
    pub fn new(orchestrator: Orchestrator, store: Arc<dyn DatasetStore>) -> Self {
        Self {
            orchestrator,
            store,
        }
    }
}

impl PublishExecutor for OrchestratorExecutor {
    fn execute(&self, task: &PublishTask) -> Result<PublishReport, PublishError> {
        publish_snapshot(
            &self.orchestrator,
            self.store.as_ref(),
            &task.dataset,
            &task.snapshot,
            task.realm.as_str(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl From<&DaemonConfig> for RetryPolicy {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Cloneable handle for submitting and inspecting tasks.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<PublishTask>,
    tasks: TaskTable,
    next_id: Arc<AtomicU64>,
}

impl TaskQueue {
    /// A queue plus the receiving end for [`spawn_workers`].
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            tx,
            tasks: TaskTable::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (queue, rx)
    }

    /// Accept a publish for later execution. The realm, dataset id and tag
    /// are validated here; the store is not consulted until a worker runs
    /// the task.
    pub async fn enqueue(
        &self,
        dataset: DatasetId,
        snapshot: SnapshotTag,
        realm: &str,
    ) -> Result<TaskId, DaemonError> {
        let realm: Realm = realm.parse()?;
        dataset.validate().map_err(PublishError::from)?;
        snapshot.validate().map_err(PublishError::from)?;
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        self.tasks.write().await.insert(
            id,
            TaskRecord {
                id,
                dataset: dataset.clone(),
                snapshot: snapshot.clone(),
                realm,
                status: TaskStatus::Queued,
                attempts: 0,
                targets: Vec::new(),
                last_error: None,
                submitted_at: now,
                updated_at: now,
            },
        );

        let task = PublishTask {
            id,
            dataset,
            snapshot,
            realm,
            attempt: 1,
        };
        tracing::info!(task = %id, dataset = %task.dataset, snapshot = %task.snapshot, %realm, "publish queued");
        if self.tx.send(task).await.is_err() {
            self.tasks.write().await.remove(&id);
            return Err(DaemonError::ChannelClosed("publish queue"));
        }
        Ok(id)
    }

    pub async fn get(&self, id: TaskId) -> Option<TaskRecord> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Every known task, oldest first.
    pub async fn list(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    async fn update(&self, id: TaskId, apply: impl FnOnce(&mut TaskRecord)) {
        if let Some(record) = self.tasks.write().await.get_mut(&id) {
            apply(record);
            record.updated_at = Utc::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Start `workers` tasks draining `rx` until shutdown.
pub fn spawn_workers(
    workers: usize,
    queue: TaskQueue,
    rx: mpsc::Receiver<PublishTask>,
    executor: Arc<dyn PublishExecutor>,
    policy: RetryPolicy,
    shutdown: &broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..workers.max(1))
        .map(|worker| {
            let queue = queue.clone();
            let rx = rx.clone();
            let executor = executor.clone();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    let next = tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        next = async { rx.lock().await.recv().await } => next,
                    };
                    let Some(task) = next else { break };
                    run_task(worker, &queue, executor.clone(), policy, task).await;
                }
                tracing::debug!(worker, "publish worker stopped");
            })
        })
        .collect()
}

async fn run_task(
    worker: usize,
    queue: &TaskQueue,
    executor: Arc<dyn PublishExecutor>,
    policy: RetryPolicy,
    task: PublishTask,
) {
    let id = task.id;
    let attempt = task.attempt;
    queue
        .update(id, |r| {
            r.status = TaskStatus::Running;
            r.attempts = attempt;
        })
        .await;
    tracing::info!(worker, task = %id, dataset = %task.dataset, attempt, "publish started");

    let job = task.clone();
    let result = tokio::task::spawn_blocking(move || executor.execute(&job))
        .await
        .unwrap_or_else(|err| {
            Err(PublishError::Transfer {
                target: task.realm.object_storage_target(),
                message: format!("publish worker panicked: {err}"),
            })
        });

    // A report is returned even when a fatal error stopped the invocation
    // part way; its targets cover everything that ran.
    let (targets, failure) = match result {
        Ok(report) => {
            let targets = TargetSummary::from_report(&report);
            (targets, report.into_result().err())
        }
        Err(err) => (Vec::new(), Some(err)),
    };

    match failure {
        None => {
            queue
                .update(id, |r| {
                    r.status = TaskStatus::Succeeded;
                    r.targets = targets;
                    r.last_error = None;
                })
                .await;
            tracing::info!(task = %id, dataset = %task.dataset, attempt, "publish succeeded");
        }
        Some(err) if err.is_retryable() && attempt < policy.max_attempts => {
            let delay = policy.delay_for(attempt);
            let message = err.to_string();
            queue
                .update(id, |r| {
                    r.status = TaskStatus::Retrying;
                    r.targets = targets;
                    r.last_error = Some(message);
                })
                .await;
            tracing::warn!(task = %id, attempt, error = %err, delay_ms = delay.as_millis() as u64, "publish failed; retrying");

            let tx = queue.tx.clone();
            let retry = PublishTask {
                attempt: attempt + 1,
                ..task
            };
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if tx.send(retry).await.is_err() {
                    tracing::warn!(task = %id, "queue closed before retry");
                }
            });
        }
        Some(err) => {
            let message = err.to_string();
            queue
                .update(id, |r| {
                    r.status = TaskStatus::Failed;
                    r.targets = targets;
                    r.last_error = Some(message);
                })
                .await;
            if err.is_fatal() {
                tracing::error!(task = %id, dataset = %task.dataset, error = %err, "publish failed; not retrying");
            } else {
                tracing::error!(task = %id, dataset = %task.dataset, attempt, error = %err, "publish failed; attempts exhausted");
            }
        }
    }
}
