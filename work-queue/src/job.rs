//! Queue job envelope

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

/// Kind of work a job carries. Dispatch keys on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Credit a single wallet
    Deposit,
    /// Debit a single wallet
    Withdraw,
    /// Move funds between two wallets
    Transfer,
}

impl JobKind {
    /// Stable string form, used for metric labels and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Deposit => "deposit",
            JobKind::Withdraw => "withdraw",
            JobKind::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work delivered at least once.
///
/// The payload is opaque JSON; handlers decode it with [`Job::payload_as`].
/// `attempt` is stamped by the consumer on each delivery, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job id (time-ordered)
    pub id: Uuid,

    /// What kind of work this is
    pub kind: JobKind,

    /// Handler-defined payload
    pub payload: serde_json::Value,

    /// Delivery attempt, 0 until first delivery
    pub attempt: u32,

    /// When the job entered the queue
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Create a job from a serializable payload
    pub fn new<P: Serialize>(kind: JobKind, payload: &P) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            kind,
            payload: serde_json::to_value(payload)?,
            attempt: 0,
            enqueued_at: Utc::now(),
        })
    }

    /// Decode the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Handle returned to producers on enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRef {
    /// Id of the enqueued job
    pub id: Uuid,
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
