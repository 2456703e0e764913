//! Task Handler Registry
//!
//! Maps the closed set of task kinds to typed handlers. Handlers decode
//! their own payloads (decode failure is fatal validation), report
//! progress through the context, and poll the cancellation signal at
//! their own suspension points.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::Config;
use crate::external::blobs::BlobStore;
use crate::external::documents::DocumentStore;
use crate::external::mailer::MailTransport;
use crate::external::notify::NotificationSink;
use crate::storage::store::KvStore;

use super::queue::TaskQueue;
use super::types::{Task, TaskError, TaskKind};

/// Everything a handler may touch: the substrate, the scheduler (for
/// follow-up enqueues and progress), the external collaborators, and the
/// shutdown signal.
pub struct TaskContext {
    pub kv: Arc<dyn KvStore>,
    pub queue: Arc<TaskQueue>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub mailer: Arc<dyn MailTransport>,
    pub notifier: Arc<dyn NotificationSink>,
    pub config: Arc<Config>,
    shutdown: watch::Receiver<bool>,
}

impl TaskContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kv: Arc<dyn KvStore>,
        queue: Arc<TaskQueue>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        mailer: Arc<dyn MailTransport>,
        notifier: Arc<dyn NotificationSink>,
        config: Arc<Config>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            kv,
            queue,
            documents,
            blobs,
            mailer,
            notifier,
            config,
            shutdown,
        }
    }

    /// Cooperative cancellation: long-running handlers check this between
    /// batches and abort further substrate writes when it fires.
    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Report progress for observability. Errors are swallowed: progress
    /// must never fail a task.
    pub async fn report_progress(&self, task: &Task, percent: u8) {
        if let Err(err) = self.queue.update_progress(&task.id, percent).await {
            tracing::debug!("Progress update for {} failed: {}", task.id, err);
        }
    }
}

/// A handler for one task kind.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError>;
}

/// Decode a task payload into its typed form. Scheduler-injected fields
/// (`correlation_id`, `timestamp`) are ignored by payload structs that do
/// not declare them.
pub fn decode_payload<T: DeserializeOwned>(task: &Task) -> Result<T, TaskError> {
    serde_json::from_value(task.payload.clone())
        .map_err(|e| TaskError::Validation(format!("invalid {} payload: {}", task.kind, e)))
}

pub struct TaskHandlerRegistry {
    handlers: DashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
        })
    }

    pub fn register(&self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        if self.handlers.insert(kind, handler).is_some() {
            tracing::warn!("Replaced existing handler for task kind {}", kind);
        } else {
            tracing::info!("Registered task handler: {}", kind);
        }
    }

    pub fn has_handler(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch a task to its handler. An unregistered kind is a fatal
    /// validation error, so the worker dead-letters instead of retrying.
    pub async fn execute(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let handler = self
            .handlers
            .get(&task.kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                TaskError::Validation(format!("unsupported task kind: {}", task.kind))
            })?;

        tracing::debug!("Executing {} task {}", task.kind, task.id);
        handler.run(task, ctx).await
    }
}
