//! Job queue: enqueue/dequeue/processing-set/completion (spec §4.4).
//!
//! The job queue is deliberately abstract over its backing broker; this crate
//! ships an in-memory reference implementation used by the worker pool's
//! tests and by `semflow-cli` in single-process deployments.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use semflow_core::job::Job;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("action already processing: {0}")]
    AlreadyProcessing(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Contract a concrete broker/key-value backend must satisfy.
///
/// - `enqueue` appends to the list keyed `{prefix}{queue_name}`.
/// - `dequeue` blocks (per-call, never across a stale deadline) up to
///   `timeout`, returning `None` on timeout.
/// - `mark_processing`/`complete_job`/`fail_job` manage the `{prefix}processing`
///   sorted set keyed by deadline epoch.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    async fn dequeue(&self, queue_name: &str, wait: Duration) -> Result<Option<Job>, QueueError>;

    async fn mark_processing(&self, action_id: &str, deadline: DateTime<Utc>) -> Result<(), QueueError>;

    async fn complete_job(&self, action_id: &str) -> Result<(), QueueError>;

    async fn fail_job(
        &self,
        action_id: &str,
        requeue: bool,
        queue_name: &str,
        retry_count: u32,
    ) -> Result<(), QueueError>;

    async fn queue_depth(&self, queue_name: &str) -> Result<usize, QueueError>;

    async fn is_processing(&self, action_id: &str) -> Result<bool, QueueError>;

    async fn wait_for_completion(
        &self,
        action_id: &str,
        wait: Duration,
        probe: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<bool, QueueError>;
}

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<Job>>,
    // Sorted by (deadline epoch millis, action_id); the action_id tiebreaker
    // keeps two actions with an identical millisecond deadline from colliding
    // on the same key, unlike a bare `BTreeMap<i64, String>` would.
    processing: BTreeSet<(i64, String)>,
    processing_by_id: HashMap<String, i64>,
}

/// In-memory [`JobQueue`] backed by a per-queue deque and a deadline-sorted
/// processing set. Matches the "at any instant, an actionID appears in at
/// most one of {list, processing set} along the happy path" invariant.
pub struct InMemoryJobQueue {
    inner: Mutex<Inner>,
    notify: tokio::sync::Notify,
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: tokio::sync::Notify::new(),
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        inner
            .lists
            .entry(job.queue_name.clone())
            .or_default()
            .push_back(job);
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue_name: &str, wait: Duration) -> Result<Option<Job>, QueueError> {
        // A fresh deadline per call: never reuse a long-lived context.
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job) = inner.lists.entry(queue_name.to_string()).or_default().pop_front() {
                    return Ok(Some(job));
                }
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if timeout(remaining, self.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn mark_processing(&self, action_id: &str, deadline: DateTime<Utc>) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.processing_by_id.contains_key(action_id) {
            return Err(QueueError::AlreadyProcessing(action_id.to_string()));
        }
        let epoch = deadline.timestamp_millis();
        inner.processing.insert((epoch, action_id.to_string()));
        inner.processing_by_id.insert(action_id.to_string(), epoch);
        Ok(())
    }

    async fn complete_job(&self, action_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if let Some(epoch) = inner.processing_by_id.remove(action_id) {
            inner.processing.remove(&(epoch, action_id.to_string()));
        }
        Ok(())
    }

    async fn fail_job(
        &self,
        action_id: &str,
        requeue: bool,
        queue_name: &str,
        retry_count: u32,
    ) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(epoch) = inner.processing_by_id.remove(action_id) {
                inner.processing.remove(&(epoch, action_id.to_string()));
            }
        }
        if requeue {
            let mut job = Job::new(action_id, queue_name, "");
            job.retry_count = retry_count + 1;
            self.enqueue(job).await?;
        }
        Ok(())
    }

    async fn queue_depth(&self, queue_name: &str) -> Result<usize, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.lists.get(queue_name).map(VecDeque::len).unwrap_or(0))
    }

    async fn is_processing(&self, action_id: &str) -> Result<bool, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.processing_by_id.contains_key(action_id))
    }

    async fn wait_for_completion(
        &self,
        action_id: &str,
        wait: Duration,
        probe: &(dyn Fn() -> bool + Send + Sync),
    ) -> Result<bool, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if probe() && !self.is_processing(action_id).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = InMemoryJobQueue::new();
        let result = queue.dequeue("parallel", Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(Job::new("a1", "parallel", "wf-1")).await.unwrap();
        let job = queue.dequeue("parallel", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(job.action_id, "a1");
    }

    #[tokio::test]
    async fn queue_invariant_not_in_two_lists_simultaneously() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(Job::new("a1", "parallel", "wf-1")).await.unwrap();
        let job = queue.dequeue("parallel", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(queue.queue_depth("parallel").await.unwrap(), 0);

        queue
            .mark_processing(&job.action_id, Utc::now() + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(queue.is_processing(&job.action_id).await.unwrap());

        queue.complete_job(&job.action_id).await.unwrap();
        assert!(!queue.is_processing(&job.action_id).await.unwrap());
    }

    #[tokio::test]
    async fn fail_job_with_requeue_increments_retry_count() {
        let queue = InMemoryJobQueue::new();
        queue.enqueue(Job::new("a1", "parallel", "wf-1")).await.unwrap();
        let job = queue.dequeue("parallel", Duration::from_secs(1)).await.unwrap().unwrap();
        queue
            .mark_processing(&job.action_id, Utc::now() + ChronoDuration::seconds(30))
            .await
            .unwrap();

        queue.fail_job(&job.action_id, true, "parallel", job.retry_count).await.unwrap();
        assert!(!queue.is_processing(&job.action_id).await.unwrap());

        let requeued = queue.dequeue("parallel", Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn mark_processing_twice_is_rejected() {
        let queue = InMemoryJobQueue::new();
        queue
            .mark_processing("a1", Utc::now() + ChronoDuration::seconds(30))
            .await
            .unwrap();
        let err = queue
            .mark_processing("a1", Utc::now() + ChronoDuration::seconds(30))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AlreadyProcessing(_)));
    }

    #[tokio::test]
    async fn identical_deadlines_do_not_orphan_a_processing_entry() {
        let queue = InMemoryJobQueue::new();
        let deadline = Utc::now() + ChronoDuration::seconds(30);
        queue.mark_processing("a1", deadline).await.unwrap();
        queue.mark_processing("a2", deadline).await.unwrap();

        queue.complete_job("a1").await.unwrap();
        assert!(!queue.is_processing("a1").await.unwrap());
        assert!(queue.is_processing("a2").await.unwrap());

        queue.complete_job("a2").await.unwrap();
        assert!(!queue.is_processing("a2").await.unwrap());
    }
}
