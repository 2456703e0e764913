use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::store::KvError;

/// Default handler timeout: 5 minutes.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 300_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The closed set of task kinds this backend processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ProcessEmail,
    SendEmail,
    ProcessAttachments,
    GenerateAnalytics,
    CleanupStorage,
    IndexSearch,
    UpdateThread,
    SendNotification,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::ProcessEmail => "process_email",
            TaskKind::SendEmail => "send_email",
            TaskKind::ProcessAttachments => "process_attachments",
            TaskKind::GenerateAnalytics => "generate_analytics",
            TaskKind::CleanupStorage => "cleanup_storage",
            TaskKind::IndexSearch => "index_search",
            TaskKind::UpdateThread => "update_thread",
            TaskKind::SendNotification => "send_notification",
        }
    }

    pub fn all() -> [TaskKind; 8] {
        [
            TaskKind::ProcessEmail,
            TaskKind::SendEmail,
            TaskKind::ProcessAttachments,
            TaskKind::GenerateAnalytics,
            TaskKind::CleanupStorage,
            TaskKind::IndexSearch,
            TaskKind::UpdateThread,
            TaskKind::SendNotification,
        ]
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Class-separation weight used by the ready-set ordering. Larger weight
    /// means the task pops earlier (the score subtracts it).
    pub fn weight(&self) -> i64 {
        match self {
            Priority::High => 1_000_000,
            Priority::Normal => 100_000,
            Priority::Low => 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The durable task record. Serialized task JSON is the member stored in
/// the queue partitions, so serialization must be deterministic: field
/// order is fixed and `metadata` is a BTreeMap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: u64,
    pub scheduled_for: u64,
    pub last_attempt_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
    pub correlation_id: String,
    pub timeout_ms: Option<u64>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TASK_TIMEOUT_MS))
    }

    /// The observability record written to the status hash on every
    /// transition.
    pub fn status_record(&self) -> StatusRecord {
        StatusRecord {
            status: self.status,
            attempts: self.attempts,
            progress: None,
            last_attempt_at: self.last_attempt_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }
}

/// What clients poll to observe a task: the current status plus attempt
/// and progress bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: TaskStatus,
    pub attempts: u32,
    pub progress: Option<u8>,
    pub last_attempt_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error: Option<String>,
}

/// Caller-supplied knobs for `enqueue`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub priority: Option<Priority>,
    /// Epoch ms; a future instant places the task in the scheduled set.
    pub scheduled_for: Option<u64>,
    pub max_attempts: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
}

/// A follow-up enqueued by the completion hook. Stored under the
/// `dependent_tasks` metadata key of the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependentTask {
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub opts: EnqueueOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Exponential,
    Linear,
}

/// Retry delay policy. `attempts` is the number of runs already made, so
/// the first retry uses `initial` and exponential growth doubles from
/// there, bounded by `cap`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub strategy: BackoffStrategy,
    pub initial: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let attempts = attempts.max(1);
        let delay = match self.strategy {
            BackoffStrategy::Exponential => {
                let factor = 2u32.saturating_pow(attempts - 1);
                self.initial.saturating_mul(factor)
            }
            BackoffStrategy::Linear => self.initial.saturating_mul(attempts),
        };
        delay.min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

/// The error taxonomy handlers report. The worker's retry decision is a
/// function of `retryable()`, never of message contents.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Payload or options violate invariants. Fatal, no retry.
    #[error("validation error: {0}")]
    Validation(String),

    /// Infrastructure I/O failed; retried under backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// A required lock is held elsewhere; retried under backoff.
    #[error("lock contention: {0}")]
    LockContention(String),

    /// A stored record failed its integrity checks. Fatal.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The handler exceeded the task timeout; retried under backoff.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
}

impl TaskError {
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            TaskError::Transient(_) | TaskError::LockContention(_) | TaskError::Timeout(_)
        )
    }
}

impl From<KvError> for TaskError {
    fn from(err: KvError) -> Self {
        TaskError::Transient(err.to_string())
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
