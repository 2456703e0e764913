//! Executor Module Tests
//!
//! Covers the scheduler's partition transitions, retry/backoff/DLQ
//! behavior, priority ordering, the completion hook, the stale-lease
//! reaper, and the worker pool end to end against the in-memory
//! substrate.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::watch;

    use crate::alerts::store::AlertStore;
    use crate::alerts::types::AlertState;
    use crate::config::Config;
    use crate::executor::executor::TaskExecutor;
    use crate::executor::queue::{
        TaskQueue, FAILED_KEY, PROCESSING_KEY, READY_KEY, SCHEDULED_KEY,
    };
    use crate::executor::registry::{TaskContext, TaskHandler, TaskHandlerRegistry};
    use crate::executor::types::{
        now_ms, BackoffStrategy, EnqueueOptions, Priority, RetryPolicy, Task, TaskError, TaskId,
        TaskKind, TaskStatus,
    };
    use crate::external::blobs::MemoryBlobStore;
    use crate::external::documents::MemoryDocumentStore;
    use crate::external::mailer::MemoryMailTransport;
    use crate::external::notify::MemoryNotificationSink;
    use crate::storage::memory::MemoryKv;
    use crate::storage::store::KvStore;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            initial: Duration::from_millis(40),
            cap: Duration::from_millis(500),
        }
    }

    fn test_queue() -> (Arc<dyn KvStore>, Arc<TaskQueue>) {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = TaskQueue::new(Arc::clone(&kv), fast_retry(), 3);
        (kv, queue)
    }

    fn test_context(
        kv: Arc<dyn KvStore>,
        queue: Arc<TaskQueue>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Arc<TaskContext> {
        Arc::new(TaskContext::new(
            kv,
            queue,
            MemoryDocumentStore::new(),
            MemoryBlobStore::new(),
            MemoryMailTransport::new(),
            MemoryNotificationSink::new(),
            Arc::new(Config::default()),
            shutdown_rx,
        ))
    }

    /// How many queue partitions currently contain the task id.
    async fn partitions_holding(kv: &Arc<dyn KvStore>, id: &TaskId) -> usize {
        let mut count = 0;
        for key in [READY_KEY, SCHEDULED_KEY, PROCESSING_KEY, FAILED_KEY] {
            let members = kv.zrange(key, 0, -1, false).await.unwrap();
            if members.iter().any(|m| {
                serde_json::from_str::<Task>(&m.member)
                    .map(|t| t.id == *id)
                    .unwrap_or(false)
            }) {
                count += 1;
            }
        }
        count
    }

    // ============================================================
    // SCHEDULER: enqueue / lease / complete
    // ============================================================

    #[tokio::test]
    async fn test_enqueue_lease_complete_happy_path() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendNotification,
                serde_json::json!({"user_id": "u1"}),
                EnqueueOptions {
                    max_attempts: Some(3),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Pending);
        assert_eq!(partitions_holding(&kv, &id).await, 1);

        let task = queue.lease().await.unwrap().expect("task is due");
        assert_eq!(task.id, id);
        assert_eq!(task.attempts, 1);
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Processing
        );

        queue.complete(task).await.unwrap();
        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Completed);
        assert!(status.completed_at.is_some());
        // Terminal success leaves every partition.
        assert_eq!(partitions_holding(&kv, &id).await, 0);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_bad_arguments() {
        let (_kv, queue) = test_queue();

        let err = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({}),
                EnqueueOptions {
                    max_attempts: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));

        let err = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!("not an object"),
                EnqueueOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
    }

    #[tokio::test]
    async fn test_payload_carries_correlation_id_and_timestamp() {
        let (_kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::GenerateAnalytics,
                serde_json::json!({"period_start": 0, "period_end": 10}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let task = queue.get_task(&id).await.unwrap().unwrap();
        let correlation = task.payload["correlation_id"].as_str().unwrap();
        assert_eq!(correlation, task.correlation_id);
        assert!(task.payload["timestamp"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_future_task_lands_in_scheduled_and_promotes_when_due() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::CleanupStorage,
                serde_json::json!({"older_than_ms": 1}),
                EnqueueOptions {
                    scheduled_for: Some(now_ms() + 60),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Scheduled
        );
        // Not due yet.
        assert!(queue.lease().await.unwrap().is_none());
        assert_eq!(kv.zcard(SCHEDULED_KEY).await.unwrap(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        let task = queue.lease().await.unwrap().expect("promoted after due time");
        assert_eq!(task.id, id);
    }

    // ============================================================
    // PRIORITY ORDERING
    // ============================================================

    #[tokio::test]
    async fn test_priority_preemption() {
        let (_kv, queue) = test_queue();

        let low = queue
            .enqueue(
                TaskKind::CleanupStorage,
                serde_json::json!({"older_than_ms": 1}),
                EnqueueOptions {
                    priority: Some(Priority::Low),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let high = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = queue.lease().await.unwrap().unwrap();
        let second = queue.lease().await.unwrap().unwrap();
        assert_eq!(first.id, high);
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn test_older_task_wins_within_priority_class() {
        let (_kv, queue) = test_queue();

        let older = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    scheduled_for: Some(now_ms().saturating_sub(5_000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let newer = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(queue.lease().await.unwrap().unwrap().id, older);
        assert_eq!(queue.lease().await.unwrap().unwrap().id, newer);
    }

    // ============================================================
    // RETRY / BACKOFF / DLQ
    // ============================================================

    #[tokio::test]
    async fn test_fail_schedules_retry_with_exponential_backoff() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        // First failure: delay = initial * 2^0.
        let task = queue.lease().await.unwrap().unwrap();
        let before = now_ms();
        queue
            .fail(task, &TaskError::Transient("boom".into()))
            .await
            .unwrap();

        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.attempts, 1);
        let delay = task.scheduled_for - before;
        assert!((30..200).contains(&delay), "first retry delay was {}ms", delay);

        // Second failure: delay = initial * 2^1.
        let mut leased = None;
        for _ in 0..20 {
            if let Some(task) = queue.lease().await.unwrap() {
                leased = Some(task);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let task = leased.expect("retry became due");
        assert_eq!(task.attempts, 2);
        let before = now_ms();
        queue
            .fail(task, &TaskError::Transient("boom".into()))
            .await
            .unwrap();

        let task = queue.get_task(&id).await.unwrap().unwrap();
        let delay = task.scheduled_for - before;
        assert!((70..300).contains(&delay), "second retry delay was {}ms", delay);
        assert_eq!(partitions_holding(&kv, &id).await, 1);
    }

    #[tokio::test]
    async fn test_backoff_delay_is_capped() {
        let policy = RetryPolicy {
            strategy: BackoffStrategy::Exponential,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));

        let linear = RetryPolicy {
            strategy: BackoffStrategy::Linear,
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(4),
        };
        assert_eq!(linear.delay_for(1), Duration::from_secs(1));
        assert_eq!(linear.delay_for(3), Duration::from_secs(3));
        assert_eq!(linear.delay_for(9), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_dlq_after_attempts_exhausted() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    max_attempts: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for _ in 0..2 {
            // Wait out any retry delay, then fail the lease.
            for _ in 0..20 {
                if let Some(task) = queue.lease().await.unwrap() {
                    queue
                        .fail(task, &TaskError::Transient("always fails".into()))
                        .await
                        .unwrap();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Failed);
        assert_eq!(status.attempts, 2);
        assert!(status.error.is_some());

        // DLQ totality: present in failed, absent everywhere else.
        assert_eq!(kv.zcard(FAILED_KEY).await.unwrap(), 1);
        assert_eq!(partitions_holding(&kv, &id).await, 1);
        assert_eq!(kv.zcard(READY_KEY).await.unwrap(), 0);
        assert_eq!(kv.zcard(SCHEDULED_KEY).await.unwrap(), 0);
        assert_eq!(kv.zcard(PROCESSING_KEY).await.unwrap(), 0);

        let failed = queue.list_failed(0, 10, true).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
    }

    #[tokio::test]
    async fn test_fatal_error_skips_retry() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let task = queue.lease().await.unwrap().unwrap();
        queue
            .fail(task, &TaskError::Validation("bad payload".into()))
            .await
            .unwrap();

        // One attempt spent out of three, yet already dead-lettered.
        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Failed);
        assert_eq!(status.attempts, 1);
        assert_eq!(kv.zcard(FAILED_KEY).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_high_priority_dlq_raises_alert() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let alerts = AlertStore::new(Arc::clone(&kv));
        let queue = TaskQueue::with_alerts(Arc::clone(&kv), fast_retry(), 3, alerts.clone());

        queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    priority: Some(Priority::High),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let task = queue.lease().await.unwrap().unwrap();
        queue
            .fail(task, &TaskError::Validation("bad".into()))
            .await
            .unwrap();

        let recent = alerts.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source, "task_dlq");
        assert_eq!(recent[0].state, AlertState::Active);
    }

    // ============================================================
    // CANCEL / PROGRESS / OBSERVABILITY
    // ============================================================

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        assert!(queue.cancel(&id).await.unwrap());
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(partitions_holding(&kv, &id).await, 0);
        assert!(queue.lease().await.unwrap().is_none());

        // Terminal: a second cancel is a no-op.
        assert!(!queue.cancel(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_progress_is_clamped() {
        let (_kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::IndexSearch,
                serde_json::json!({"doc_id": "d", "doc_type": "email", "content": "x"}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        queue.update_progress(&id, 250).await.unwrap();
        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.progress, Some(100));

        queue.update_progress(&id, 42).await.unwrap();
        let status = queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.progress, Some(42));
    }

    // ============================================================
    // COMPLETION HOOK
    // ============================================================

    #[tokio::test]
    async fn test_completion_hook_enqueues_dependents() {
        let (_kv, queue) = test_queue();

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert(
            "dependent_tasks".to_string(),
            serde_json::json!([
                {
                    "kind": "send_notification",
                    "payload": {"user_id": "u1", "channel": "in_app", "title": "t", "body": "b"}
                }
            ]),
        );

        let id = queue
            .enqueue(
                TaskKind::ProcessEmail,
                serde_json::json!({"message_id": "m1"}),
                EnqueueOptions {
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let task = queue.lease().await.unwrap().unwrap();
        queue.complete(task).await.unwrap();

        // Parent completed, dependent waiting in ready.
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        let dependent = queue.lease().await.unwrap().expect("dependent enqueued");
        assert_eq!(dependent.kind, TaskKind::SendNotification);
        assert_eq!(dependent.payload["user_id"], "u1");
    }

    #[tokio::test]
    async fn test_completion_hook_is_best_effort_on_malformed_metadata() {
        let (_kv, queue) = test_queue();

        let mut metadata = std::collections::BTreeMap::new();
        metadata.insert("dependent_tasks".to_string(), serde_json::json!("not a list"));

        let id = queue
            .enqueue(
                TaskKind::ProcessEmail,
                serde_json::json!({"message_id": "m1"}),
                EnqueueOptions {
                    metadata: Some(metadata),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let task = queue.lease().await.unwrap().unwrap();
        queue.complete(task).await.unwrap();

        // The parent still completes; nothing new was enqueued.
        assert_eq!(
            queue.get_status(&id).await.unwrap().unwrap().status,
            TaskStatus::Completed
        );
        assert!(queue.lease().await.unwrap().is_none());
    }

    // ============================================================
    // LEASE SUPERVISION
    // ============================================================

    #[tokio::test]
    async fn test_reaper_returns_stale_lease_to_queue() {
        let (kv, queue) = test_queue();

        let id = queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let leased = queue.lease().await.unwrap().unwrap();
        assert_eq!(leased.attempts, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let reaped = queue
            .reap_stale(Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(kv.zcard(PROCESSING_KEY).await.unwrap(), 0);

        let task = queue.get_task(&id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(task.error.as_deref(), Some("transient error: lease expired"));

        // The attempt was spent; the next lease is attempt 2.
        for _ in 0..20 {
            if let Some(task) = queue.lease().await.unwrap() {
                assert_eq!(task.id, id);
                assert_eq!(task.attempts, 2);
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("reaped task never became leasable again");
    }

    #[tokio::test]
    async fn test_renewal_keeps_lease_fresh() {
        let (_kv, queue) = test_queue();

        queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        let task = queue.lease().await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.renew_lease(&task).await.unwrap();

        // Renewed 50ms in: a 70ms timeout measured now must not reap it.
        let reaped = queue.reap_stale(Duration::from_millis(40)).await.unwrap();
        assert_eq!(reaped, 0);
    }

    // ============================================================
    // WORKER POOL INTEGRATION
    // ============================================================

    /// Fails N times, then succeeds.
    struct FlakyHandler {
        remaining_failures: AtomicU32,
    }

    impl FlakyHandler {
        fn new(n: u32) -> Arc<Self> {
            Arc::new(Self {
                remaining_failures: AtomicU32::new(n),
            })
        }
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn run(&self, _task: &Task, _ctx: &TaskContext) -> Result<(), TaskError> {
            let left = self.remaining_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(TaskError::Transient(format!(
                    "intentional failure (left={})",
                    left
                )));
            }
            Ok(())
        }
    }

    struct SleepyHandler {
        duration: Duration,
    }

    #[async_trait]
    impl TaskHandler for SleepyHandler {
        async fn run(&self, _task: &Task, _ctx: &TaskContext) -> Result<(), TaskError> {
            tokio::time::sleep(self.duration).await;
            Ok(())
        }
    }

    struct WorkerHarness {
        queue: Arc<TaskQueue>,
        executor: Arc<TaskExecutor>,
        joins: Vec<tokio::task::JoinHandle<()>>,
    }

    fn spawn_workers(registry: Arc<TaskHandlerRegistry>) -> WorkerHarness {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let queue = TaskQueue::new(Arc::clone(&kv), fast_retry(), 3);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = test_context(Arc::clone(&kv), Arc::clone(&queue), shutdown_rx);

        let executor = TaskExecutor::new(
            Arc::clone(&queue),
            registry,
            ctx,
            1,
            Duration::from_millis(10),
            Duration::from_secs(5),
            shutdown_tx,
        );
        let joins = executor.start();
        WorkerHarness {
            queue,
            executor,
            joins,
        }
    }

    async fn wait_for_status(
        queue: &TaskQueue,
        id: &TaskId,
        expected: TaskStatus,
    ) -> Option<crate::executor::types::StatusRecord> {
        for _ in 0..100 {
            if let Some(status) = queue.get_status(id).await.unwrap() {
                if status.status == expected {
                    return Some(status);
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    #[tokio::test]
    async fn test_worker_retries_until_success() {
        let registry = TaskHandlerRegistry::new();
        registry.register(TaskKind::SendEmail, FlakyHandler::new(2));
        let harness = spawn_workers(registry);

        let id = harness
            .queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let status = wait_for_status(&harness.queue, &id, TaskStatus::Completed)
            .await
            .expect("task should complete after two retries");
        assert_eq!(status.attempts, 3);

        harness.executor.request_shutdown();
        for join in harness.joins {
            let _ = join.await;
        }
    }

    #[tokio::test]
    async fn test_worker_dead_letters_persistent_failure() {
        let registry = TaskHandlerRegistry::new();
        registry.register(TaskKind::SendEmail, FlakyHandler::new(100));
        let harness = spawn_workers(registry);

        let id = harness
            .queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    max_attempts: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let status = wait_for_status(&harness.queue, &id, TaskStatus::Failed)
            .await
            .expect("task should dead-letter");
        assert_eq!(status.attempts, 2);
        assert!(status.error.unwrap().contains("intentional failure"));

        harness.executor.request_shutdown();
        for join in harness.joins {
            let _ = join.await;
        }
    }

    #[tokio::test]
    async fn test_worker_fails_unregistered_kind_without_retry() {
        let registry = TaskHandlerRegistry::new();
        registry.register(TaskKind::SendEmail, FlakyHandler::new(0));
        let harness = spawn_workers(registry);

        let id = harness
            .queue
            .enqueue(
                TaskKind::CleanupStorage,
                serde_json::json!({"older_than_ms": 1}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        let status = wait_for_status(&harness.queue, &id, TaskStatus::Failed)
            .await
            .expect("unsupported kind should dead-letter");
        // Fatal on the first attempt: no retries burned.
        assert_eq!(status.attempts, 1);
        assert!(status.error.unwrap().contains("unsupported task kind"));

        harness.executor.request_shutdown();
        for join in harness.joins {
            let _ = join.await;
        }
    }

    #[tokio::test]
    async fn test_worker_times_out_slow_handler() {
        let registry = TaskHandlerRegistry::new();
        registry.register(
            TaskKind::SendEmail,
            Arc::new(SleepyHandler {
                duration: Duration::from_secs(10),
            }),
        );
        let harness = spawn_workers(registry);

        let id = harness
            .queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions {
                    max_attempts: Some(1),
                    timeout_ms: Some(50),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let status = wait_for_status(&harness.queue, &id, TaskStatus::Failed)
            .await
            .expect("timed-out task should dead-letter at max_attempts=1");
        assert!(status.error.unwrap().contains("timed out"));

        harness.executor.request_shutdown();
        for join in harness.joins {
            let _ = join.await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_in_flight_task_as_worker_stopped() {
        let registry = TaskHandlerRegistry::new();
        registry.register(
            TaskKind::SendEmail,
            Arc::new(SleepyHandler {
                duration: Duration::from_secs(30),
            }),
        );
        let harness = spawn_workers(registry);

        let id = harness
            .queue
            .enqueue(
                TaskKind::SendEmail,
                serde_json::json!({"to": ["a@b.c"]}),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();

        // Let the worker pick it up, then pull the plug.
        wait_for_status(&harness.queue, &id, TaskStatus::Processing)
            .await
            .expect("task should start processing");
        harness.executor.request_shutdown();
        for join in harness.joins {
            let _ = join.await;
        }

        let status = harness.queue.get_status(&id).await.unwrap().unwrap();
        assert_eq!(status.status, TaskStatus::Scheduled);
        assert!(status.error.unwrap().contains("worker stopped"));
    }
}
