//! Queue consumer with bounded concurrency, retries, and dead-lettering
//!
//! Each job is dispatched to the handler registered for its kind.
//! Retryable failures are retried with exponential backoff up to the
//! configured attempt budget, then dead-lettered as reprocessable.
//! Permanent failures are dead-lettered immediately, the outcome having
//! already been decided.

use crate::dlq::DeadLetters;
use crate::job::{Job, JobKind};
use crate::metrics::{
    JOBS_DEAD_LETTERED_TOTAL, JOBS_IN_FLIGHT, JOBS_PROCESSED_TOTAL, JOB_PROCESS_DURATION,
};
use crate::queue::MemoryQueue;
use crate::retry::RetryConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error as ThisError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

/// How a handler reports failure. The variant decides the job's fate:
/// retryable errors re-run with backoff, permanent errors dead-letter
/// the job on the spot.
#[derive(Debug, ThisError)]
pub enum JobError {
    /// Transient failure; the same job may succeed later
    #[error("{0}")]
    Retryable(String),

    /// The job can never succeed; retrying would repeat the same outcome
    #[error("{0}")]
    Permanent(String),
}

/// Handles one kind of job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process a single delivery
    async fn handle(&self, job: Job) -> std::result::Result<(), JobError>;
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Max jobs handled concurrently
    pub max_concurrent: usize,

    /// Retry policy for retryable failures
    pub retry: RetryConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            retry: RetryConfig::default(),
        }
    }
}

/// Drains a queue, dispatching jobs to registered handlers.
pub struct QueueConsumer {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    config: ConsumerConfig,
    dead_letters: Arc<DeadLetters>,
}

impl QueueConsumer {
    /// Create a consumer with no handlers registered
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            handlers: HashMap::new(),
            config,
            dead_letters: Arc::new(DeadLetters::new()),
        }
    }

    /// Register the handler for a job kind, replacing any previous one
    pub fn register(&mut self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Shared handle to the dead letter register
    pub fn dead_letters(&self) -> Arc<DeadLetters> {
        self.dead_letters.clone()
    }

    /// Drain the queue until it closes. Jobs run concurrently up to
    /// `max_concurrent`; the loop itself never blocks on a slow handler
    /// beyond permit acquisition. A job waiting out its backoff releases
    /// its slot and re-acquires one before the next attempt.
    pub async fn run(self, queue: MemoryQueue) -> Result<()> {
        let mut rx = queue.take_receiver().ok_or(Error::Closed)?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let handlers = Arc::new(self.handlers);

        info!(
            "Consumer started ({} handler(s), {} max concurrent)",
            handlers.len(),
            self.config.max_concurrent
        );

        while let Some(job) = rx.recv().await {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Enqueue(e.to_string()))?;
            let handlers = handlers.clone();
            let retry = self.config.retry.clone();
            let dead_letters = self.dead_letters.clone();
            let semaphore = semaphore.clone();

            tokio::spawn(async move {
                process_job(job, permit, semaphore, &handlers, &retry, &dead_letters).await;
            });
        }

        info!("Queue closed, consumer stopping");
        Ok(())
    }
}

async fn process_job(
    mut job: Job,
    mut permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
    handlers: &HashMap<JobKind, Arc<dyn JobHandler>>,
    retry: &RetryConfig,
    dead_letters: &DeadLetters,
) {
    let kind = job.kind.as_str();

    let handler = match handlers.get(&job.kind) {
        Some(handler) => handler.clone(),
        None => {
            error!("No handler registered for {} job {}", job.kind, job.id);
            JOBS_DEAD_LETTERED_TOTAL.with_label_values(&[kind]).inc();
            dead_letters.push(job, "no handler registered".to_string(), false);
            return;
        }
    };

    loop {
        job.attempt += 1;

        JOBS_IN_FLIGHT.inc();
        let start = Instant::now();
        let outcome = handler.handle(job.clone()).await;
        JOB_PROCESS_DURATION
            .with_label_values(&[kind])
            .observe(start.elapsed().as_secs_f64());
        JOBS_IN_FLIGHT.dec();

        match outcome {
            Ok(()) => {
                JOBS_PROCESSED_TOTAL.with_label_values(&[kind, "ok"]).inc();
                return;
            }
            Err(JobError::Permanent(reason)) => {
                JOBS_PROCESSED_TOTAL
                    .with_label_values(&[kind, "permanent"])
                    .inc();
                JOBS_DEAD_LETTERED_TOTAL.with_label_values(&[kind]).inc();
                dead_letters.push(job, reason, false);
                return;
            }
            Err(JobError::Retryable(reason)) => {
                JOBS_PROCESSED_TOTAL
                    .with_label_values(&[kind, "retryable"])
                    .inc();

                if job.attempt >= retry.max_attempts {
                    error!(
                        "Job {} failed {} attempt(s), giving up: {}",
                        job.id, job.attempt, reason
                    );
                    JOBS_DEAD_LETTERED_TOTAL.with_label_values(&[kind]).inc();
                    dead_letters.push(job, reason, true);
                    return;
                }

                let delay = retry.delay_for(job.attempt - 1);
                warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.id, job.attempt, retry.max_attempts, delay, reason
                );

                // A backing-off job must not occupy a worker slot.
                drop(permit);
                tokio::time::sleep(delay).await;
                permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Semaphore closed: the consumer is gone. Park the
                        // job for manual reprocessing instead of dropping it.
                        JOBS_DEAD_LETTERED_TOTAL.with_label_values(&[kind]).inc();
                        dead_letters.push(job, "consumer stopped".to_string(), true);
                        return;
                    }
                };
            }
        }
    }
}
