//! Task Scheduler
//!
//! Owns the four queue partitions in the substrate and every transition
//! between them. Each member is the serialized task record; transitions
//! are pipelined remove-then-add writes, so a task id lives in at most one
//! partition outside a single batch window.
//!
//! ## Partitions
//! - `ready`: score = priority score (see `priority_score`); pop-min yields
//!   the best task.
//! - `scheduled`: score = due time (epoch ms).
//! - `processing`: score = lease acquisition time, refreshed by renewal.
//! - `failed`: the dead-letter queue, score = failure time.
//!
//! The `status` hash and the `job:{id}` mirror are updated on every
//! transition for observability and random access.

use std::sync::Arc;
use std::time::Duration;

use crate::alerts::store::AlertStore;
use crate::alerts::types::AlertSeverity;
use crate::storage::store::{KvError, KvStore};
use crate::storage::types::KvOp;

use super::types::{
    now_ms, DependentTask, EnqueueOptions, Priority, RetryPolicy, StatusRecord, Task, TaskError,
    TaskId, TaskKind, TaskStatus,
};

pub const READY_KEY: &str = "ready";
pub const SCHEDULED_KEY: &str = "scheduled";
pub const PROCESSING_KEY: &str = "processing";
pub const FAILED_KEY: &str = "failed";
pub const STATUS_KEY: &str = "status";

fn job_key(id: &TaskId) -> String {
    format!("job:{}", id)
}

/// Ready-set ordering: pop-min takes the smallest score, so older tasks
/// (smaller `scheduled_for`) sink and a heavier priority weight pushes the
/// score further down. High preempts normal preempts low whenever both are
/// due, while age decides within a class.
fn priority_score(task: &Task, now: u64) -> f64 {
    (task.scheduled_for as i64 - now as i64 - task.priority.weight()) as f64
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepths {
    pub ready: usize,
    pub scheduled: usize,
    pub processing: usize,
    pub failed: usize,
}

pub struct TaskQueue {
    kv: Arc<dyn KvStore>,
    retry: RetryPolicy,
    default_max_attempts: u32,
    alerts: Option<AlertStore>,
}

impl TaskQueue {
    pub fn new(kv: Arc<dyn KvStore>, retry: RetryPolicy, default_max_attempts: u32) -> Arc<Self> {
        Arc::new(Self {
            kv,
            retry,
            default_max_attempts,
            alerts: None,
        })
    }

    /// Attach an alert store so high-priority dead-letters raise alerts.
    pub fn with_alerts(
        kv: Arc<dyn KvStore>,
        retry: RetryPolicy,
        default_max_attempts: u32,
        alerts: AlertStore,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            retry,
            default_max_attempts,
            alerts: Some(alerts),
        })
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    /// Create a durable task and place it in `ready` or `scheduled`.
    ///
    /// The scheduler injects `correlation_id` and `timestamp` into the
    /// payload object so every handler and every retry sees the same
    /// logical-operation id.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<TaskId, TaskError> {
        let max_attempts = opts.max_attempts.unwrap_or(self.default_max_attempts);
        if max_attempts < 1 {
            return Err(TaskError::Validation("max_attempts must be >= 1".into()));
        }
        if !payload.is_object() {
            return Err(TaskError::Validation(format!(
                "{} payload must be an object, got {}",
                kind,
                kind_of_json(&payload)
            )));
        }
        let mut payload = payload;

        let now = now_ms();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert(
                "correlation_id".to_string(),
                serde_json::Value::String(correlation_id.clone()),
            );
            map.insert("timestamp".to_string(), serde_json::json!(now));
        }

        let scheduled_for = opts.scheduled_for.unwrap_or(now);
        let in_future = scheduled_for > now;
        let task = Task {
            id: TaskId::new(),
            kind,
            payload,
            priority: opts.priority.unwrap_or_default(),
            status: if in_future {
                TaskStatus::Scheduled
            } else {
                TaskStatus::Pending
            },
            attempts: 0,
            max_attempts,
            created_at: now,
            scheduled_for,
            last_attempt_at: None,
            completed_at: None,
            error: None,
            correlation_id,
            timeout_ms: opts.timeout_ms,
            metadata: opts.metadata.unwrap_or_default(),
        };

        let encoded = encode(&task)?;
        let (partition, score) = if in_future {
            (SCHEDULED_KEY, scheduled_for as f64)
        } else {
            (READY_KEY, priority_score(&task, now))
        };

        self.kv
            .pipeline(vec![
                KvOp::ZAdd {
                    key: partition.to_string(),
                    member: encoded.clone(),
                    score,
                },
                KvOp::Set {
                    key: job_key(&task.id),
                    value: encoded,
                },
                status_op(&task),
            ])
            .await?;

        tracing::debug!(
            "Enqueued {} task {} (priority {:?}, due {})",
            kind,
            task.id,
            task.priority,
            scheduled_for
        );
        Ok(task.id)
    }

    // ------------------------------------------------------------------
    // Lease
    // ------------------------------------------------------------------

    /// Promote due scheduled tasks, then pop the best ready task into
    /// `processing`. Returns `None` when nothing is due.
    pub async fn lease(&self) -> Result<Option<Task>, TaskError> {
        let now = now_ms();
        self.promote_due(now).await?;

        loop {
            let Some(entry) = self.kv.zpop_min(READY_KEY).await? else {
                return Ok(None);
            };
            let mut task = match decode(&entry.member) {
                Ok(task) => task,
                Err(err) => {
                    // A corrupt member cannot be retried; drop it and keep
                    // draining the queue.
                    tracing::error!("Dropping malformed ready entry: {}", err);
                    continue;
                }
            };

            task.status = TaskStatus::Processing;
            task.attempts += 1;
            task.last_attempt_at = Some(now);

            let encoded = encode(&task)?;
            self.kv
                .pipeline(vec![
                    KvOp::ZAdd {
                        key: PROCESSING_KEY.to_string(),
                        member: encoded.clone(),
                        score: now as f64,
                    },
                    KvOp::Set {
                        key: job_key(&task.id),
                        value: encoded,
                    },
                    status_op(&task),
                ])
                .await?;

            tracing::debug!(
                "Leased task {} ({}, attempt {}/{})",
                task.id,
                task.kind,
                task.attempts,
                task.max_attempts
            );
            return Ok(Some(task));
        }
    }

    /// Move every scheduled task whose due time has passed into `ready`.
    async fn promote_due(&self, now: u64) -> Result<(), TaskError> {
        let due = self
            .kv
            .zrange_by_score(SCHEDULED_KEY, f64::NEG_INFINITY, now as f64)
            .await?;
        for entry in due {
            let mut task = match decode(&entry.member) {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!("Dropping malformed scheduled entry: {}", err);
                    self.kv.zrem(SCHEDULED_KEY, &entry.member).await?;
                    continue;
                }
            };
            task.status = TaskStatus::Pending;
            let encoded = encode(&task)?;
            self.kv
                .pipeline(vec![
                    KvOp::ZRem {
                        key: SCHEDULED_KEY.to_string(),
                        member: entry.member.clone(),
                    },
                    KvOp::ZAdd {
                        key: READY_KEY.to_string(),
                        member: encoded.clone(),
                        score: priority_score(&task, now),
                    },
                    KvOp::Set {
                        key: job_key(&task.id),
                        value: encoded,
                    },
                    status_op(&task),
                ])
                .await?;
        }
        Ok(())
    }

    /// Refresh the lease on a processing task. Fails once the entry has
    /// been reaped or completed elsewhere, which stops the renewal loop.
    pub async fn renew_lease(&self, task: &Task) -> Result<(), TaskError> {
        let member = encode(task)?;
        if self.kv.zscore(PROCESSING_KEY, &member).await?.is_none() {
            return Err(TaskError::Transient(format!(
                "task {} no longer holds a lease",
                task.id
            )));
        }
        self.kv
            .zadd(PROCESSING_KEY, &member, now_ms() as f64)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outcomes
    // ------------------------------------------------------------------

    /// Record success, then enqueue any dependents listed in the task's
    /// `dependent_tasks` metadata. Dependent enqueues are best-effort: a
    /// failure is logged and the parent stays completed.
    pub async fn complete(&self, task: Task) -> Result<(), TaskError> {
        let leased_member = encode(&task)?;
        let mut task = task;
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now_ms());
        task.error = None;

        self.kv
            .pipeline(vec![
                KvOp::ZRem {
                    key: PROCESSING_KEY.to_string(),
                    member: leased_member,
                },
                KvOp::Set {
                    key: job_key(&task.id),
                    value: encode(&task)?,
                },
                status_op(&task),
            ])
            .await?;

        tracing::info!("Task {} ({}) completed", task.id, task.kind);
        self.enqueue_dependents(&task).await;
        Ok(())
    }

    async fn enqueue_dependents(&self, task: &Task) {
        let Some(raw) = task.metadata.get("dependent_tasks") else {
            return;
        };
        let dependents: Vec<DependentTask> = match serde_json::from_value(raw.clone()) {
            Ok(list) => list,
            Err(err) => {
                tracing::error!(
                    "Task {} has malformed dependent_tasks metadata: {}",
                    task.id,
                    err
                );
                return;
            }
        };
        for dependent in dependents {
            match self
                .enqueue(dependent.kind, dependent.payload, dependent.opts)
                .await
            {
                Ok(id) => {
                    tracing::debug!(
                        "Task {} spawned dependent {} task {}",
                        task.id,
                        dependent.kind,
                        id
                    );
                }
                Err(err) => {
                    tracing::error!(
                        "Failed to enqueue dependent {} of task {}: {}",
                        dependent.kind,
                        task.id,
                        err
                    );
                }
            }
        }
    }

    /// Record failure. Retryable errors with budget left go back to
    /// `scheduled` under backoff; everything else dead-letters.
    pub async fn fail(&self, task: Task, err: &TaskError) -> Result<(), TaskError> {
        let leased_member = encode(&task)?;
        let mut task = task;
        task.error = Some(err.to_string());

        let retry = err.retryable() && task.attempts < task.max_attempts;
        if retry {
            let delay = self.retry.delay_for(task.attempts);
            // Small jitter keeps simultaneous failures from re-waking as a
            // thundering herd.
            let jitter = rand::random::<u64>() % 50;
            let now = now_ms();
            task.status = TaskStatus::Scheduled;
            task.scheduled_for = now + delay.as_millis() as u64 + jitter;

            let encoded = encode(&task)?;
            self.kv
                .pipeline(vec![
                    KvOp::ZRem {
                        key: PROCESSING_KEY.to_string(),
                        member: leased_member,
                    },
                    KvOp::ZAdd {
                        key: SCHEDULED_KEY.to_string(),
                        member: encoded.clone(),
                        score: task.scheduled_for as f64,
                    },
                    KvOp::Set {
                        key: job_key(&task.id),
                        value: encoded,
                    },
                    status_op(&task),
                ])
                .await?;

            tracing::warn!(
                "Task {} ({}) failed attempt {}/{}, retrying in {:?}: {}",
                task.id,
                task.kind,
                task.attempts,
                task.max_attempts,
                delay,
                err
            );
        } else {
            task.status = TaskStatus::Failed;
            let now = now_ms();

            let encoded = encode(&task)?;
            self.kv
                .pipeline(vec![
                    KvOp::ZRem {
                        key: PROCESSING_KEY.to_string(),
                        member: leased_member,
                    },
                    KvOp::ZAdd {
                        key: FAILED_KEY.to_string(),
                        member: encoded.clone(),
                        score: now as f64,
                    },
                    KvOp::Set {
                        key: job_key(&task.id),
                        value: encoded,
                    },
                    status_op(&task),
                ])
                .await?;

            tracing::error!(
                "Task {} ({}) dead-lettered after {} attempts: {}",
                task.id,
                task.kind,
                task.attempts,
                err
            );
            if task.priority == Priority::High {
                if let Some(alerts) = &self.alerts {
                    let message = format!(
                        "high-priority {} task {} dead-lettered: {}",
                        task.kind, task.id, err
                    );
                    if let Err(alert_err) =
                        alerts.raise(AlertSeverity::High, "task_dlq", &message).await
                    {
                        tracing::error!("Failed to raise DLQ alert: {}", alert_err);
                    }
                }
            }
        }
        Ok(())
    }

    /// External cancellation. Terminal statuses are left untouched; a task
    /// in flight keeps running but its record is marked cancelled.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool, TaskError> {
        let Some(mut task) = self.get_task(id).await? else {
            return Ok(false);
        };
        if task.status.is_terminal() {
            return Ok(false);
        }

        let member = encode(&task)?;
        let partition = match task.status {
            TaskStatus::Pending => READY_KEY,
            TaskStatus::Scheduled => SCHEDULED_KEY,
            TaskStatus::Processing => PROCESSING_KEY,
            _ => unreachable!("terminal statuses handled above"),
        };

        task.status = TaskStatus::Cancelled;
        self.kv
            .pipeline(vec![
                KvOp::ZRem {
                    key: partition.to_string(),
                    member,
                },
                KvOp::Set {
                    key: job_key(&task.id),
                    value: encode(&task)?,
                },
                status_op(&task),
            ])
            .await?;

        tracing::info!("Task {} cancelled", id);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Observability
    // ------------------------------------------------------------------

    pub async fn get_task(&self, id: &TaskId) -> Result<Option<Task>, TaskError> {
        match self.kv.get(&job_key(id)).await? {
            Some(raw) => Ok(Some(decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn get_status(&self, id: &TaskId) -> Result<Option<StatusRecord>, TaskError> {
        match self.kv.hget(STATUS_KEY, &id.0).await? {
            Some(raw) => {
                let record = serde_json::from_str(&raw).map_err(|e| {
                    TaskError::Integrity(format!("malformed status record for {}: {}", id, e))
                })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Page through the dead-letter queue.
    pub async fn list_failed(
        &self,
        offset: usize,
        limit: usize,
        newest_first: bool,
    ) -> Result<Vec<Task>, TaskError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;
        let entries = self.kv.zrange(FAILED_KEY, start, stop, newest_first).await?;

        let mut tasks = Vec::with_capacity(entries.len());
        for entry in entries {
            match decode(&entry.member) {
                Ok(task) => tasks.push(task),
                Err(err) => tracing::error!("Skipping malformed DLQ entry: {}", err),
            }
        }
        Ok(tasks)
    }

    /// Progress is observability only; it never affects scheduling.
    pub async fn update_progress(&self, id: &TaskId, percent: u8) -> Result<(), TaskError> {
        let percent = percent.min(100);
        let Some(raw) = self.kv.hget(STATUS_KEY, &id.0).await? else {
            return Ok(());
        };
        let mut record: StatusRecord = serde_json::from_str(&raw)
            .map_err(|e| TaskError::Integrity(format!("malformed status record for {}: {}", id, e)))?;
        record.progress = Some(percent);
        let encoded = serde_json::to_string(&record)
            .map_err(|e| TaskError::Transient(format!("status encode failed: {}", e)))?;
        self.kv.hset(STATUS_KEY, &id.0, &encoded).await?;
        Ok(())
    }

    pub async fn queue_depths(&self) -> Result<QueueDepths, TaskError> {
        Ok(QueueDepths {
            ready: self.kv.zcard(READY_KEY).await?,
            scheduled: self.kv.zcard(SCHEDULED_KEY).await?,
            processing: self.kv.zcard(PROCESSING_KEY).await?,
            failed: self.kv.zcard(FAILED_KEY).await?,
        })
    }

    // ------------------------------------------------------------------
    // Lease supervision
    // ------------------------------------------------------------------

    /// Return abandoned `processing` entries (lease older than
    /// `lease_timeout`) to the queue, or dead-letter them when the attempt
    /// budget is spent. The attempt was counted at lease time. Returns how
    /// many entries were reaped.
    pub async fn reap_stale(&self, lease_timeout: Duration) -> Result<usize, TaskError> {
        let cutoff = now_ms().saturating_sub(lease_timeout.as_millis() as u64);
        let stale = self
            .kv
            .zrange_by_score(PROCESSING_KEY, f64::NEG_INFINITY, cutoff as f64)
            .await?;

        let mut reaped = 0;
        for entry in stale {
            let task = match decode(&entry.member) {
                Ok(task) => task,
                Err(err) => {
                    tracing::error!("Dropping malformed processing entry: {}", err);
                    self.kv.zrem(PROCESSING_KEY, &entry.member).await?;
                    continue;
                }
            };
            tracing::warn!(
                "Reaping stale lease on task {} ({}, attempt {}/{})",
                task.id,
                task.kind,
                task.attempts,
                task.max_attempts
            );
            self.fail(task, &TaskError::Transient("lease expired".into()))
                .await?;
            reaped += 1;
        }
        Ok(reaped)
    }
}

fn status_op(task: &Task) -> KvOp {
    let record = task.status_record();
    KvOp::HSet {
        key: STATUS_KEY.to_string(),
        field: task.id.0.clone(),
        // StatusRecord serialization cannot fail: plain fields only.
        value: serde_json::to_string(&record).unwrap_or_default(),
    }
}

fn encode(task: &Task) -> Result<String, TaskError> {
    serde_json::to_string(task)
        .map_err(|e| TaskError::Transient(format!("task encode failed: {}", e)))
}

fn decode(raw: &str) -> Result<Task, TaskError> {
    serde_json::from_str(raw)
        .map_err(|e| TaskError::Integrity(format!("malformed task record: {}", e)))
}

fn kind_of_json(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
