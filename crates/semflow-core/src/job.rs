//! [`Job`]: the minimal record scheduled by the worker pool (spec §3.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of work enqueued for a worker to pick up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub action_id: String,
    pub queue_name: String,
    pub workflow_id: String,
    pub run_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl Job {
    pub fn new(
        action_id: impl Into<String>,
        queue_name: impl Into<String>,
        workflow_id: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            queue_name: queue_name.into(),
            workflow_id: workflow_id.into(),
            run_id: Uuid::new_v4(),
            enqueued_at: Utc::now(),
            retry_count: 0,
        }
    }

    /// Build the next attempt of this job with `retry_count` incremented.
    pub fn next_attempt(&self) -> Self {
        Self {
            action_id: self.action_id.clone(),
            queue_name: self.queue_name.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id,
            enqueued_at: Utc::now(),
            retry_count: self.retry_count + 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_attempt_increments_retry_count_monotonically() {
        let job = Job::new("a1", "parallel", "wf-1");
        let retry1 = job.next_attempt();
        let retry2 = retry1.next_attempt();
        assert_eq!(job.retry_count, 0);
        assert_eq!(retry1.retry_count, 1);
        assert_eq!(retry2.retry_count, 2);
        assert_eq!(retry1.action_id, job.action_id);
    }
}
