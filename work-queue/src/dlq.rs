//! Dead letter register
//!
//! Jobs that exhaust their retries or fail permanently land here with
//! failure metadata, so operators can inspect them and re-enqueue the
//! reprocessable ones.

use crate::job::Job;
use crate::queue::WorkQueue;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

/// Dead-lettered job with failure metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// Entry id, distinct from the job id
    pub id: Uuid,
    /// The job as last delivered
    pub job: Job,
    /// Why the final attempt failed
    pub failure_reason: String,
    /// Delivery attempts made before giving up
    pub attempts: u32,
    /// When the job was dead-lettered
    pub failed_at: DateTime<Utc>,
    /// Whether re-enqueueing could plausibly succeed. Jobs rejected for
    /// business reasons are not reprocessable; jobs that exhausted
    /// retries on transient failures are.
    pub reprocessable: bool,
}

/// In-process dead letter register
#[derive(Default)]
pub struct DeadLetters {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl DeadLetters {
    /// Create an empty register
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed job
    pub fn push(&self, job: Job, failure_reason: String, reprocessable: bool) -> Uuid {
        let entry = DeadLetterEntry {
            id: Uuid::new_v4(),
            attempts: job.attempt,
            failure_reason: failure_reason.clone(),
            failed_at: Utc::now(),
            reprocessable,
            job,
        };
        let id = entry.id;

        warn!(
            "Job {} dead-lettered after {} attempt(s): {} (reprocessable: {})",
            entry.job.id, entry.attempts, failure_reason, reprocessable
        );

        self.entries.write().push(entry);
        id
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries.read().clone()
    }

    /// Number of dead-lettered jobs
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the register is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Re-enqueue a reprocessable entry, removing it from the register.
    /// Returns `false` if the entry is unknown or not reprocessable.
    pub async fn reprocess<Q: WorkQueue>(&self, entry_id: Uuid, queue: &Q) -> Result<bool> {
        let entry = {
            let mut entries = self.entries.write();
            match entries.iter().position(|e| e.id == entry_id) {
                Some(idx) if entries[idx].reprocessable => entries.remove(idx),
                _ => return Ok(false),
            }
        };

        info!("Reprocessing dead-lettered job {}", entry.job.id);
        let mut job = entry.job;
        job.attempt = 0;
        queue.enqueue(job).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;
    use crate::queue::MemoryQueue;

    #[tokio::test]
    async fn test_reprocess_requeues_and_removes() {
        let register = DeadLetters::new();
        let queue = MemoryQueue::new();
        let mut rx = queue.take_receiver().unwrap();

        let mut job = Job::new(JobKind::Deposit, &()).unwrap();
        job.attempt = 3;
        let job_id = job.id;
        let entry_id = register.push(job, "timeout".to_string(), true);

        assert!(register.reprocess(entry_id, &queue).await.unwrap());
        assert!(register.is_empty());

        let requeued = rx.recv().await.unwrap();
        assert_eq!(requeued.id, job_id);
        assert_eq!(requeued.attempt, 0);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_reprocessable() {
        let register = DeadLetters::new();
        let queue = MemoryQueue::new();

        let job = Job::new(JobKind::Withdraw, &()).unwrap();
        let entry_id = register.push(job, "insufficient balance".to_string(), false);

        assert!(!register.reprocess(entry_id, &queue).await.unwrap());
        assert_eq!(register.len(), 1);
    }
}
