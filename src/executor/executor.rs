//! Worker Pool Implementation
//!
//! Spawns the task workers and the stale-lease reaper. Each worker is a
//! single cooperative loop: lease, dispatch under timeout, record the
//! outcome. Horizontal scale comes from running more workers (or more
//! processes); correctness relies on the scheduler's pipelined partition
//! transitions plus whatever per-resource locks handlers take themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::queue::TaskQueue;
use super::registry::{TaskContext, TaskHandlerRegistry};
use super::types::{Task, TaskError};

pub struct TaskExecutor {
    queue: Arc<TaskQueue>,
    registry: Arc<TaskHandlerRegistry>,
    ctx: Arc<TaskContext>,
    worker_count: usize,
    poll_interval: Duration,
    lease_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl TaskExecutor {
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<TaskHandlerRegistry>,
        ctx: Arc<TaskContext>,
        worker_count: usize,
        poll_interval: Duration,
        lease_timeout: Duration,
        shutdown_tx: watch::Sender<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            registry,
            ctx,
            worker_count,
            poll_interval,
            lease_timeout,
            shutdown_tx,
        })
    }

    /// Spawn all workers plus the reaper. Handles are returned so callers
    /// can await drain on shutdown.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        tracing::info!("Starting {} task workers", self.worker_count);

        let mut joins = Vec::with_capacity(self.worker_count + 1);
        for worker_id in 0..self.worker_count {
            let executor = Arc::clone(self);
            let shutdown_rx = self.shutdown_tx.subscribe();
            joins.push(tokio::spawn(async move {
                executor.worker_loop(worker_id, shutdown_rx).await;
            }));
        }

        let executor = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        joins.push(tokio::spawn(async move {
            executor.reaper_loop(shutdown_rx).await;
        }));

        joins
    }

    /// Signal every loop to stop taking new leases. In-flight tasks are
    /// failed with "worker stopped" so retry policy decides their fate.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::info!("Worker {} started", worker_id);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.lease().await {
                Ok(Some(task)) => {
                    self.run_task(worker_id, task, &mut shutdown_rx).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::warn!("Worker {} lease failed: {}", worker_id, err);
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
            }
        }

        tracing::info!("Worker {} stopped", worker_id);
    }

    async fn run_task(
        &self,
        worker_id: usize,
        task: Task,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let renewal = self.spawn_lease_renewal(&task);
        let timeout = task.timeout();

        let result = tokio::select! {
            outcome = tokio::time::timeout(timeout, self.registry.execute(&task, &self.ctx)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(TaskError::Timeout(timeout)),
                }
            }
            _ = shutdown_rx.changed() => {
                Err(TaskError::Transient("worker stopped".into()))
            }
        };

        renewal.abort();

        match result {
            Ok(()) => {
                if let Err(err) = self.queue.complete(task).await {
                    tracing::error!("Worker {} failed to record completion: {}", worker_id, err);
                }
            }
            Err(task_err) => {
                if let Err(err) = self.queue.fail(task, &task_err).await {
                    tracing::error!("Worker {} failed to record failure: {}", worker_id, err);
                }
            }
        }
    }

    /// Keeps the `processing` score fresh while the handler runs, so the
    /// reaper only reclaims leases whose worker actually died.
    fn spawn_lease_renewal(&self, task: &Task) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let task = task.clone();
        let interval = self.lease_timeout / 3;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match queue.renew_lease(&task).await {
                    Ok(()) => {
                        tracing::trace!("Renewed lease for task {}", task.id);
                    }
                    Err(_) => {
                        tracing::trace!("Task {} no longer needs lease renewal", task.id);
                        break;
                    }
                }
            }
        })
    }

    async fn reaper_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = (self.lease_timeout / 2).max(Duration::from_millis(50));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.reap_stale(self.lease_timeout).await {
                Ok(0) => {}
                Ok(reaped) => {
                    tracing::warn!("Reaper returned {} stale leases to the queue", reaped);
                }
                Err(err) => {
                    tracing::warn!("Reaper pass failed: {}", err);
                }
            }
        }
    }
}
