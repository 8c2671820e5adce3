//! Queue producer boundary and the channel-backed implementation

use crate::error::{Error, Result};
use crate::job::{Job, JobRef};
use crate::metrics::JOBS_ENQUEUED_TOTAL;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Producer side of the queue. Delivery is at least once; consumers must
/// tolerate redelivery of any job.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    /// Accept a job for asynchronous processing
    async fn enqueue(&self, job: Job) -> Result<JobRef>;
}

struct Channel {
    tx: mpsc::UnboundedSender<Job>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
}

/// In-process queue over an unbounded channel.
///
/// Clones share one channel, so any clone can enqueue while a single
/// consumer drains. The receiver can be taken exactly once.
#[derive(Clone)]
pub struct MemoryQueue {
    channel: Arc<Channel>,
}

impl MemoryQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            channel: Arc::new(Channel {
                tx,
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    /// Detach the consumer end. Returns `None` if already taken.
    pub fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Job>> {
        self.channel.rx.lock().take()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<JobRef> {
        let id = job.id;
        debug!("Enqueueing {} job {}", job.kind, id);
        let kind = job.kind;
        self.channel.tx.send(job).map_err(|_| Error::Closed)?;
        JOBS_ENQUEUED_TOTAL.with_label_values(&[kind.as_str()]).inc();
        Ok(JobRef { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobKind;

    #[tokio::test]
    async fn test_enqueue_then_receive() {
        let queue = MemoryQueue::new();
        let mut rx = queue.take_receiver().unwrap();

        let job = Job::new(JobKind::Deposit, &()).unwrap();
        let job_ref = queue.enqueue(job.clone()).await.unwrap();
        assert_eq!(job_ref.id, job.id);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, job.id);
    }

    #[tokio::test]
    async fn test_receiver_can_only_be_taken_once() {
        let queue = MemoryQueue::new();
        assert!(queue.take_receiver().is_some());
        assert!(queue.take_receiver().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_after_receiver_dropped_is_closed() {
        let queue = MemoryQueue::new();
        drop(queue.take_receiver().unwrap());

        let job = Job::new(JobKind::Withdraw, &()).unwrap();
        assert!(matches!(queue.enqueue(job).await, Err(Error::Closed)));
    }
}
