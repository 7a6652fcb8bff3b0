//! Fixed-width per-queue worker pool (spec §4.5).
//!
//! Each queue gets its own bank of tasks at a fixed width (`sequential`: 1,
//! `parallel`: 5, `priority`: 2 by default). Workers dequeue with a per-call
//! timeout, mark the job processing under a lease, hand it to an
//! [`ActionExecutor`], then complete or fail it. Delivery is at-least-once:
//! a worker that dies mid-execution leaves the job in the processing set
//! until its lease expires and a reclaimer (owned by the caller) requeues it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use semflow_core::job::Job;
use semflow_queue::{JobQueue, QueueError};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Outcome an [`ActionExecutor`] reports for a single job attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The action completed; remove the job from the processing set.
    Success,
    /// A transient failure; requeue with an incremented retry count.
    Retry,
    /// A terminal failure; remove from processing, do not requeue.
    Terminal,
}

/// Executes a single dequeued job. Implemented by the dispatcher in the
/// handler-dispatch layer; kept abstract here so the worker pool has no
/// dependency on transport or handler registration.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}

/// Per-queue worker width (spec §4.5 defaults: sequential=1, parallel=5, priority=2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    pub queue_widths: HashMap<String, usize>,
    #[serde(with = "duration_millis")]
    pub dequeue_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub processing_lease: Duration,
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let mut queue_widths = HashMap::new();
        queue_widths.insert("sequential".to_string(), 1);
        queue_widths.insert("parallel".to_string(), 5);
        queue_widths.insert("priority".to_string(), 2);
        Self {
            queue_widths,
            dequeue_timeout: Duration::from_secs(5),
            processing_lease: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out with {0} worker(s) still joining")]
    ShutdownTimeout(usize),
}

/// Owns one tokio task per queue slot; dispatches dequeued jobs to the
/// registered [`ActionExecutor`] and reports outcomes back to the queue.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    executor: Arc<dyn ActionExecutor>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, executor: Arc<dyn ActionExecutor>, config: WorkerPoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            queue,
            executor,
            config,
            shutdown_tx,
            shutdown_rx,
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Spawn `worker_count` tasks per configured queue.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        let mut handles = self.handles.lock().unwrap();
        if !handles.is_empty() {
            return Err(WorkerPoolError::AlreadyRunning);
        }

        for (queue_name, &width) in &self.config.queue_widths {
            for worker_index in 0..width {
                let queue = Arc::clone(&self.queue);
                let executor = Arc::clone(&self.executor);
                let queue_name = queue_name.clone();
                let dequeue_timeout = self.config.dequeue_timeout;
                let processing_lease = self.config.processing_lease;
                let mut shutdown_rx = self.shutdown_rx.clone();

                let handle = tokio::spawn(async move {
                    info!(queue = %queue_name, worker_index, "worker started");
                    loop {
                        if *shutdown_rx.borrow() {
                            break;
                        }

                        let job = tokio::select! {
                            result = queue.dequeue(&queue_name, dequeue_timeout) => result,
                            _ = shutdown_rx.changed() => break,
                        };

                        let job = match job {
                            Ok(Some(job)) => job,
                            Ok(None) => continue,
                            Err(e) => {
                                error!(queue = %queue_name, error = %e, "dequeue failed");
                                continue;
                            }
                        };

                        let deadline = Utc::now() + ChronoDuration::from_std(processing_lease).unwrap_or(ChronoDuration::seconds(60));
                        if let Err(e) = queue.mark_processing(&job.action_id, deadline).await {
                            warn!(action_id = %job.action_id, error = %e, "could not mark processing, skipping");
                            continue;
                        }

                        let outcome = executor.execute(&job).await;
                        let report = match outcome {
                            ExecutionOutcome::Success => queue.complete_job(&job.action_id).await,
                            ExecutionOutcome::Retry => {
                                // `failJob` always reports requeue=false; retrying is a
                                // distinct, explicit re-enqueue of the next attempt.
                                match queue.fail_job(&job.action_id, false, &job.queue_name, 0).await {
                                    Ok(()) => queue.enqueue(job.next_attempt()).await,
                                    Err(e) => Err(e),
                                }
                            }
                            ExecutionOutcome::Terminal => {
                                queue.fail_job(&job.action_id, false, &job.queue_name, 0).await
                            }
                        };
                        if let Err(e) = report {
                            error!(action_id = %job.action_id, error = %e, "failed to report outcome");
                        }
                    }
                    debug!(queue = %queue_name, worker_index, "worker stopped");
                });

                handles.push(handle);
            }
        }

        Ok(())
    }

    /// Signal shutdown and wait (up to `shutdown_timeout`) for all workers to join.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.handles.lock().unwrap());
        let remaining = handles.len();
        let join_all = futures::future::join_all(handles);

        match tokio::time::timeout(self.config.shutdown_timeout, join_all).await {
            Ok(_) => Ok(()),
            Err(_) => Err(WorkerPoolError::ShutdownTimeout(remaining)),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semflow_queue::InMemoryJobQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExecutor {
        calls: AtomicUsize,
        outcome: ExecutionOutcome,
    }

    #[async_trait]
    impl ActionExecutor for CountingExecutor {
        async fn execute(&self, _job: &Job) -> ExecutionOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome
        }
    }

    #[tokio::test]
    async fn dequeued_job_is_executed_and_completed() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
            outcome: ExecutionOutcome::Success,
        });

        let mut widths = HashMap::new();
        widths.insert("parallel".to_string(), 1);
        let config = WorkerPoolConfig {
            queue_widths: widths,
            dequeue_timeout: Duration::from_millis(50),
            processing_lease: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
        };

        let pool = WorkerPool::new(Arc::clone(&queue), executor.clone(), config);
        pool.start().unwrap();

        queue.enqueue(Job::new("a1", "parallel", "wf-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert!(!queue.is_processing("a1").await.unwrap());

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn retry_outcome_requeues_job() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
            outcome: ExecutionOutcome::Retry,
        });

        let mut widths = HashMap::new();
        widths.insert("parallel".to_string(), 1);
        let config = WorkerPoolConfig {
            queue_widths: widths,
            dequeue_timeout: Duration::from_millis(50),
            processing_lease: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(2),
        };

        let pool = WorkerPool::new(Arc::clone(&queue), executor.clone(), config);
        pool.start().unwrap();

        queue.enqueue(Job::new("a1", "parallel", "wf-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(queue.queue_depth("parallel").await.unwrap() >= 1 || executor.calls.load(Ordering::SeqCst) >= 1);

        pool.shutdown().await.unwrap();
    }

    #[test]
    fn default_widths_match_spec() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.queue_widths["sequential"], 1);
        assert_eq!(config.queue_widths["parallel"], 5);
        assert_eq!(config.queue_widths["priority"], 2);
    }
}
