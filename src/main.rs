use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use mailroom::alerts::monitor::HealthMonitor;
use mailroom::alerts::store::AlertStore;
use mailroom::config::Config;
use mailroom::executor::executor::TaskExecutor;
use mailroom::executor::queue::TaskQueue;
use mailroom::executor::registry::{TaskContext, TaskHandlerRegistry};
use mailroom::executor::types::{BackoffStrategy, RetryPolicy, TaskKind};
use mailroom::external::blobs::MemoryBlobStore;
use mailroom::external::documents::MemoryDocumentStore;
use mailroom::external::mailer::MemoryMailTransport;
use mailroom::external::notify::MemoryNotificationSink;
use mailroom::mail::attachments::ProcessAttachmentsHandler;
use mailroom::mail::maintenance::{CleanupStorageHandler, GenerateAnalyticsHandler};
use mailroom::mail::outbound::{SendEmailHandler, SendNotificationHandler};
use mailroom::mail::process::{ProcessEmailHandler, UpdateThreadHandler};
use mailroom::search::handlers::IndexContentHandler;
use mailroom::search::indexer::Indexer;
use mailroom::search::optimizer::IndexOptimizer;
use mailroom::storage::memory::MemoryKv;
use mailroom::storage::redis::RedisKv;
use mailroom::storage::store::KvStore;

const OPTIMIZER_INTERVAL: Duration = Duration::from_secs(3600);
const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = Arc::new(Config::from_env());

    // 1. Key-value substrate:
    let kv: Arc<dyn KvStore> = match &config.kv_url {
        Some(url) => {
            tracing::info!("Connecting to key-value store at {}", url);
            Arc::new(RedisKv::connect(url).await?)
        }
        None => {
            tracing::warn!("KV_URL not set, using the in-memory store (single process only)");
            Arc::new(MemoryKv::new())
        }
    };

    // 2. External collaborators. The memory implementations back local
    // runs; deployments swap in their own document/blob/transport wiring.
    let documents = MemoryDocumentStore::new();
    let blobs = MemoryBlobStore::new();
    let mailer = MemoryMailTransport::new();
    let notifier = MemoryNotificationSink::new();

    // 3. Scheduler, index, and alerting:
    let alerts = AlertStore::new(Arc::clone(&kv));
    let retry = RetryPolicy {
        strategy: BackoffStrategy::Exponential,
        initial: config.retry_initial,
        cap: config.retry_cap,
    };
    let queue = TaskQueue::with_alerts(
        Arc::clone(&kv),
        retry,
        config.default_max_attempts,
        alerts.clone(),
    );
    let indexer = Indexer::new(Arc::clone(&kv));
    let optimizer = IndexOptimizer::new(Arc::clone(&kv));

    // 4. Handler registration:
    let registry = TaskHandlerRegistry::new();
    registry.register(TaskKind::ProcessEmail, ProcessEmailHandler::new());
    registry.register(TaskKind::SendEmail, SendEmailHandler::new());
    registry.register(TaskKind::ProcessAttachments, ProcessAttachmentsHandler::new());
    registry.register(TaskKind::GenerateAnalytics, GenerateAnalyticsHandler::new());
    registry.register(TaskKind::CleanupStorage, CleanupStorageHandler::new());
    registry.register(
        TaskKind::IndexSearch,
        IndexContentHandler::new(Arc::clone(&indexer)),
    );
    registry.register(TaskKind::UpdateThread, UpdateThreadHandler::new());
    registry.register(TaskKind::SendNotification, SendNotificationHandler::new());
    for kind in TaskKind::all() {
        if !registry.has_handler(kind) {
            anyhow::bail!("no handler registered for task kind {}", kind);
        }
    }

    // 5. Worker pool + background loops:
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = Arc::new(TaskContext::new(
        Arc::clone(&kv),
        Arc::clone(&queue),
        documents.clone(),
        blobs,
        mailer,
        notifier,
        Arc::clone(&config),
        shutdown_rx.clone(),
    ));

    let executor = TaskExecutor::new(
        Arc::clone(&queue),
        registry,
        ctx,
        config.worker_count,
        config.poll_interval,
        config.lease_timeout,
        shutdown_tx.clone(),
    );
    let joins = executor.start();

    let monitor = HealthMonitor::new(
        Arc::clone(&kv),
        Arc::clone(&queue),
        documents,
        Arc::clone(&optimizer),
        alerts,
        config.queue_depth_alert,
    );
    tokio::spawn(monitor.run(MONITOR_INTERVAL, shutdown_rx.clone()));

    let optimizer_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut shutdown_rx = optimizer_shutdown;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(OPTIMIZER_INTERVAL) => {}
                _ = shutdown_rx.changed() => {}
            }
            if *shutdown_rx.borrow() {
                break;
            }
            match optimizer.run().await {
                Ok(report) if report.skipped => {}
                Ok(_) => {
                    if let Err(err) = optimizer.health_report().await {
                        tracing::warn!("Index health analysis failed: {}", err);
                    }
                }
                Err(err) => tracing::warn!("Index optimization failed: {}", err),
            }
        }
    });

    tracing::info!(
        "mailroom started: {} workers, lease timeout {:?}",
        config.worker_count,
        config.lease_timeout
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, draining workers");
    executor.request_shutdown();
    for join in joins {
        let _ = join.await;
    }
    tracing::info!("mailroom stopped");
    Ok(())
}
