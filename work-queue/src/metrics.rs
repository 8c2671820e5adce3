//! Prometheus metrics for the work queue

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};

lazy_static! {
    /// Total jobs enqueued
    pub static ref JOBS_ENQUEUED_TOTAL: CounterVec = register_counter_vec!(
        "work_queue_enqueued_total",
        "Total jobs enqueued",
        &["kind"]
    )
    .unwrap();

    /// Job delivery outcomes
    pub static ref JOBS_PROCESSED_TOTAL: CounterVec = register_counter_vec!(
        "work_queue_processed_total",
        "Total job deliveries by outcome",
        &["kind", "outcome"]
    )
    .unwrap();

    /// Job handling duration
    pub static ref JOB_PROCESS_DURATION: HistogramVec = register_histogram_vec!(
        "work_queue_process_duration_seconds",
        "Job handling duration in seconds",
        &["kind"]
    )
    .unwrap();

    /// Jobs currently being handled
    pub static ref JOBS_IN_FLIGHT: IntGauge = register_int_gauge!(
        "work_queue_jobs_in_flight",
        "Jobs currently being handled"
    )
    .unwrap();

    /// Total jobs dead-lettered
    pub static ref JOBS_DEAD_LETTERED_TOTAL: CounterVec = register_counter_vec!(
        "work_queue_dead_lettered_total",
        "Total jobs dead-lettered",
        &["kind"]
    )
    .unwrap();
}
