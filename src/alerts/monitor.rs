//! Periodic Health Monitor
//!
//! Runs the registered health checks on a fixed tick and converts
//! threshold violations into alert records. A source with an unresolved
//! alert is not raised again, so flapping checks do not flood the log.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::executor::queue::TaskQueue;
use crate::executor::types::TaskError;
use crate::external::documents::DocumentStore;
use crate::search::optimizer::IndexOptimizer;
use crate::storage::store::KvStore;

use super::store::AlertStore;
use super::types::AlertSeverity;

const STORAGE_ALERT_BYTES: u64 = 1024 * 1024 * 1024;

pub struct HealthMonitor {
    kv: Arc<dyn KvStore>,
    queue: Arc<TaskQueue>,
    documents: Arc<dyn DocumentStore>,
    optimizer: Arc<IndexOptimizer>,
    alerts: AlertStore,
    queue_depth_threshold: usize,
}

impl HealthMonitor {
    pub fn new(
        kv: Arc<dyn KvStore>,
        queue: Arc<TaskQueue>,
        documents: Arc<dyn DocumentStore>,
        optimizer: Arc<IndexOptimizer>,
        alerts: AlertStore,
        queue_depth_threshold: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            queue,
            documents,
            optimizer,
            alerts,
            queue_depth_threshold,
        })
    }

    /// One monitoring pass. Returns how many alerts were raised.
    pub async fn run_once(&self) -> Result<usize, TaskError> {
        let mut raised = 0;

        // KV reachability: a write-read round-trip through the substrate.
        let kv_ok = async {
            self.kv
                .set_ex("metrics:healthcheck", "ok", Duration::from_secs(60))
                .await?;
            self.kv.get("metrics:healthcheck").await
        }
        .await
        .is_ok();
        if !kv_ok {
            raised += self
                .raise_once(AlertSeverity::Critical, "kv", "key-value store unreachable")
                .await?;
        }

        if self.documents.ping().await.is_err() {
            raised += self
                .raise_once(
                    AlertSeverity::High,
                    "document_store",
                    "document store unreachable",
                )
                .await?;
        }

        let depths = self.queue.queue_depths().await?;
        let backlog = depths.ready + depths.scheduled;
        if backlog > self.queue_depth_threshold {
            raised += self
                .raise_once(
                    AlertSeverity::Medium,
                    "queue_depth",
                    &format!(
                        "queue backlog at {} tasks (threshold {})",
                        backlog, self.queue_depth_threshold
                    ),
                )
                .await?;
        }

        match self.optimizer.estimate_storage().await {
            Ok(estimate) if estimate.total_bytes > STORAGE_ALERT_BYTES => {
                raised += self
                    .raise_once(
                        AlertSeverity::Medium,
                        "index_storage",
                        &format!("index storage estimated at {} bytes", estimate.total_bytes),
                    )
                    .await?;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("Storage estimate failed: {}", err),
        }

        Ok(raised)
    }

    async fn raise_once(
        &self,
        severity: AlertSeverity,
        source: &str,
        message: &str,
    ) -> Result<usize, TaskError> {
        if self.alerts.has_unresolved(source).await? {
            return Ok(0);
        }
        self.alerts.raise(severity, source, message).await?;
        Ok(1)
    }

    /// The monitor loop, ticking until shutdown.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(0) => {}
                Ok(raised) => tracing::warn!("Health monitor raised {} alert(s)", raised),
                Err(err) => tracing::warn!("Health monitor pass failed: {}", err),
            }
        }
        tracing::info!("Health monitor stopped");
    }
}
