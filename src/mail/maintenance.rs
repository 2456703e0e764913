//! Maintenance Handlers
//!
//! `generate_analytics` aggregates event counts over a half-open window
//! and persists the aggregate; it is pure over the store's contents at
//! execution time, so replays overwrite rather than double-count.
//! `cleanup_storage` applies retention to blobs, cached values, and email
//! rows. Exclude patterns always win, and dry runs only report what a
//! real run would delete.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::registry::{decode_payload, TaskContext, TaskHandler};
use crate::executor::types::{now_ms, Task, TaskError};
use crate::external::blobs::BlobStore;
use crate::external::documents::{AnalyticsRecord, DocumentStore};
use crate::storage::store::KvStore;
use crate::storage::types::glob_match;

use super::types::{AnalyticsPayload, CleanupPayload, CleanupStats, CleanupTarget};

pub struct GenerateAnalyticsHandler;

impl GenerateAnalyticsHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl TaskHandler for GenerateAnalyticsHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: AnalyticsPayload = decode_payload(task)?;
        if payload.period_start >= payload.period_end {
            return Err(TaskError::Validation(
                "period_start must precede period_end".into(),
            ));
        }

        let emails = ctx
            .documents
            .emails_between(payload.period_start, payload.period_end)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;

        let mut by_category: BTreeMap<String, u64> = BTreeMap::new();
        let mut by_priority: BTreeMap<String, u64> = BTreeMap::new();
        let mut spam_count = 0u64;
        for email in &emails {
            for category in &email.categories {
                *by_category.entry(category.clone()).or_insert(0) += 1;
            }
            *by_priority.entry(email.priority.clone()).or_insert(0) += 1;
            if email.spam_score > 0.5 {
                spam_count += 1;
            }
        }

        // Deterministic id per window: replays overwrite the same record.
        let record = AnalyticsRecord {
            id: format!("analytics_{}_{}", payload.period_start, payload.period_end),
            period_start: payload.period_start,
            period_end: payload.period_end,
            total_emails: emails.len() as u64,
            by_category,
            by_priority,
            spam_count,
            generated_at: now_ms(),
        };
        ctx.documents
            .insert_analytics(record)
            .await
            .map_err(|e| TaskError::Transient(e.to_string()))?;

        tracing::info!(
            "Aggregated analytics over [{}, {}): {} emails",
            payload.period_start,
            payload.period_end,
            emails.len()
        );
        Ok(())
    }
}

pub struct CleanupStorageHandler;

impl CleanupStorageHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }

    fn excluded(key: &str, patterns: &[String]) -> bool {
        patterns.iter().any(|pattern| glob_match(pattern, key))
    }
}

#[async_trait]
impl TaskHandler for CleanupStorageHandler {
    async fn run(&self, task: &Task, ctx: &TaskContext) -> Result<(), TaskError> {
        let payload: CleanupPayload = decode_payload(task)?;
        if payload.older_than_ms == 0 {
            return Err(TaskError::Validation("older_than_ms must be positive".into()));
        }

        let cutoff = now_ms().saturating_sub(payload.older_than_ms);
        let targets = if payload.targets.is_empty() {
            vec![
                CleanupTarget::Blobs,
                CleanupTarget::Cache,
                CleanupTarget::Emails,
            ]
        } else {
            payload.targets.clone()
        };

        let mut stats = CleanupStats {
            dry_run: payload.dry_run,
            ..Default::default()
        };

        if targets.contains(&CleanupTarget::Blobs) {
            let heads = ctx
                .blobs
                .list("attachments/", 10_000)
                .await
                .map_err(|e| TaskError::Transient(format!("blob store: {}", e)))?;
            for head in heads {
                if ctx.is_cancelled() {
                    return Err(TaskError::Transient("cleanup cancelled".into()));
                }
                if head.uploaded_at >= cutoff {
                    continue;
                }
                if Self::excluded(&head.key, &payload.exclude_patterns) {
                    continue;
                }
                stats.blobs_deleted += 1;
                stats.blob_bytes += head.size;
                if !payload.dry_run {
                    ctx.blobs
                        .delete(&head.key)
                        .await
                        .map_err(|e| TaskError::Transient(format!("blob store: {}", e)))?;
                }
            }
        }

        if targets.contains(&CleanupTarget::Cache) {
            // Cache entries are reconstructible; the age cutoff guards
            // blobs and database rows.
            let keys = ctx.kv.scan("cache:*", 10_000).await?;
            for key in keys {
                if Self::excluded(&key, &payload.exclude_patterns) {
                    continue;
                }
                stats.cache_keys_deleted += 1;
                if !payload.dry_run {
                    ctx.kv.del(&key).await?;
                }
            }
        }

        if targets.contains(&CleanupTarget::Emails) {
            if payload.dry_run {
                let stale = ctx
                    .documents
                    .emails_between(0, cutoff)
                    .await
                    .map_err(|e| TaskError::Transient(e.to_string()))?;
                stats.emails_deleted = stale.len();
            } else {
                stats.emails_deleted = ctx
                    .documents
                    .delete_emails_older_than(cutoff)
                    .await
                    .map_err(|e| TaskError::Transient(e.to_string()))?;
            }
        }

        tracing::info!(
            "Cleanup{}: {} blobs ({} bytes), {} cache keys, {} emails",
            if payload.dry_run { " (dry run)" } else { "" },
            stats.blobs_deleted,
            stats.blob_bytes,
            stats.cache_keys_deleted,
            stats.emails_deleted
        );

        // Stats are surfaced through the substrate for observers.
        let encoded = serde_json::to_string(&stats)
            .map_err(|e| TaskError::Transient(format!("stats encode failed: {}", e)))?;
        ctx.kv
            .set_ex(
                &format!("metrics:cleanup:{}", task.id),
                &encoded,
                std::time::Duration::from_secs(3600),
            )
            .await?;
        Ok(())
    }
}
