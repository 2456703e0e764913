//! Index Optimizer and Health Analysis
//!
//! Background maintenance over the index structures, gated by one global
//! lock so at most one node optimizes at a time. Contention means another
//! node is already on it; the pass is skipped, not retried.
//!
//! Passes run over bounded key scans, processed in small batches with a
//! pause in between to bound pressure on the substrate:
//! - **Cleanup**: postings with zero members are deleted.
//! - **Recalibration**: every posting score is rewritten to
//!   `(score / n) * ln(n + 1)` where `n` is the member count.
//! - **Metadata compaction**: null fields are stripped and oversized
//!   string values ellipsized, via delete-then-set pipelines.
//!
//! Health analysis summarizes term/document totals, frequency buckets,
//! and a sampled storage estimate into a report cached for an hour.

use std::sync::Arc;
use std::time::Duration;

use crate::executor::types::{now_ms, TaskError};
use crate::storage::lock::LockManager;
use crate::storage::store::KvStore;
use crate::storage::types::{KeyKind, KvOp};

use super::types::{HealthReport, IndexHealth, OptimizationReport, StorageEstimate};

pub const OPTIMIZATION_LOCK: &str = "search:optimization";
pub const OPTIMIZATION_LOCK_TTL: Duration = Duration::from_secs(3600);

const SCAN_LIMIT: usize = 1000;
const WORK_BATCH: usize = 50;
const BATCH_PAUSE: Duration = Duration::from_millis(100);

const STATS_KEY: &str = "search:stats";
const STATS_TTL: Duration = Duration::from_secs(3600);
const COUNTERS_KEY: &str = "search:counters";

const STORAGE_SAMPLE: usize = 100;
const MAX_META_STRING: usize = 1000;
const STORAGE_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

pub struct IndexOptimizer {
    kv: Arc<dyn KvStore>,
    locks: LockManager,
}

impl IndexOptimizer {
    pub fn new(kv: Arc<dyn KvStore>) -> Arc<Self> {
        let locks = LockManager::new(Arc::clone(&kv));
        Arc::new(Self { kv, locks })
    }

    /// Run all maintenance passes. Skips (without error) when another
    /// optimizer holds the global lock.
    pub async fn run(&self) -> Result<OptimizationReport, TaskError> {
        let Some(token) = self
            .locks
            .acquire(OPTIMIZATION_LOCK, OPTIMIZATION_LOCK_TTL)
            .await?
        else {
            tracing::info!("Index optimization already running elsewhere, skipping");
            return Ok(OptimizationReport {
                skipped: true,
                ..Default::default()
            });
        };

        let result = async {
            Ok::<_, TaskError>(OptimizationReport {
                skipped: false,
                postings_removed: self.cleanup_empty_postings().await?,
                postings_rescored: self.recompute_scores().await?,
                metadata_compacted: self.compact_metadata().await?,
            })
        }
        .await;

        if let Err(err) = self.locks.release(OPTIMIZATION_LOCK, &token).await {
            tracing::warn!("Failed to release optimization lock: {}", err);
        }

        let report = result?;
        tracing::info!(
            "Index optimization finished: {} postings removed, {} rescored, {} metadata entries compacted",
            report.postings_removed,
            report.postings_rescored,
            report.metadata_compacted
        );
        Ok(report)
    }

    async fn cleanup_empty_postings(&self) -> Result<usize, TaskError> {
        let keys = self.kv.scan("posting:*", SCAN_LIMIT).await?;
        let mut removed = 0;

        for batch in keys.chunks(WORK_BATCH) {
            let mut ops = Vec::new();
            for key in batch {
                if self.kv.zcard(key).await? == 0 {
                    ops.push(KvOp::Del { key: key.clone() });
                    removed += 1;
                }
            }
            if !ops.is_empty() {
                self.kv.pipeline(ops).await?;
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }
        Ok(removed)
    }

    /// Periodic recalibration, not a per-write concern: fold the inverse
    /// document frequency of each term into its member scores.
    async fn recompute_scores(&self) -> Result<usize, TaskError> {
        let keys = self.kv.scan("posting:*", SCAN_LIMIT).await?;
        let mut rescored = 0;

        for batch in keys.chunks(WORK_BATCH) {
            let mut ops = Vec::new();
            for key in batch {
                let members = self.kv.zrange(key, 0, -1, false).await?;
                let n = members.len();
                if n == 0 {
                    continue;
                }
                let idf = ((n + 1) as f64).ln();
                for entry in members {
                    ops.push(KvOp::ZAdd {
                        key: key.clone(),
                        member: entry.member,
                        score: (entry.score / n as f64) * idf,
                    });
                    rescored += 1;
                }
            }
            if !ops.is_empty() {
                self.kv.pipeline(ops).await?;
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }
        Ok(rescored)
    }

    async fn compact_metadata(&self) -> Result<usize, TaskError> {
        let keys = self.kv.scan("meta:*", SCAN_LIMIT).await?;
        let mut compacted = 0;

        for batch in keys.chunks(WORK_BATCH) {
            for key in batch {
                let fields = self.kv.hgetall(key).await?;
                let mut ops = vec![KvOp::Del { key: key.clone() }];
                let mut changed = false;

                for (field, raw) in fields {
                    let value = match serde_json::from_str::<serde_json::Value>(&raw) {
                        Ok(value) => value,
                        Err(err) => {
                            tracing::error!(
                                "Dropping malformed metadata {}/{}: {}",
                                key,
                                field,
                                err
                            );
                            changed = true;
                            continue;
                        }
                    };
                    let (value, field_changed) = compact_value(value);
                    if field_changed {
                        compacted += 1;
                        changed = true;
                    }
                    ops.push(KvOp::HSet {
                        key: key.clone(),
                        field,
                        value: serde_json::to_string(&value).unwrap_or(raw),
                    });
                }

                if changed {
                    self.kv.pipeline(ops).await?;
                }
            }
            tokio::time::sleep(BATCH_PAUSE).await;
        }
        Ok(compacted)
    }

    /// The cached health report, recomputed at most once per hour.
    pub async fn health_report(&self) -> Result<HealthReport, TaskError> {
        if let Some(raw) = self.kv.get(STATS_KEY).await? {
            match serde_json::from_str(&raw) {
                Ok(report) => return Ok(report),
                Err(err) => tracing::warn!("Discarding malformed cached stats: {}", err),
            }
        }

        let report = self.analyze().await?;
        let encoded = serde_json::to_string(&report)
            .map_err(|e| TaskError::Transient(format!("stats encode failed: {}", e)))?;
        self.kv.set_ex(STATS_KEY, &encoded, STATS_TTL).await?;
        Ok(report)
    }

    async fn analyze(&self) -> Result<HealthReport, TaskError> {
        let posting_keys = self.kv.scan("posting:*", SCAN_LIMIT * 10).await?;
        let total_terms = posting_keys.len();

        let counters = self.kv.hgetall(COUNTERS_KEY).await?;
        let total_documents: i64 = counters
            .values()
            .filter_map(|v| v.parse::<i64>().ok())
            .sum();

        let mut frequencies = Vec::with_capacity(total_terms);
        let mut total_postings = 0usize;
        for key in &posting_keys {
            let card = self.kv.zcard(key).await?;
            total_postings += card;
            frequencies.push(card);
        }
        let avg_term_frequency = if total_terms > 0 {
            total_postings as f64 / total_terms as f64
        } else {
            0.0
        };

        let mut high = 0;
        let mut medium = 0;
        let mut low = 0;
        for freq in frequencies {
            let freq = freq as f64;
            if freq > avg_term_frequency * 2.0 {
                high += 1;
            } else if freq < avg_term_frequency / 2.0 {
                low += 1;
            } else {
                medium += 1;
            }
        }

        let storage = self.estimate_storage().await?;

        let mut issues = Vec::new();
        if total_terms > 0 && avg_term_frequency < 1.0 {
            issues.push("low average term frequency".to_string());
        }
        if high > 2 * medium {
            issues.push("unbalanced term distribution".to_string());
        }
        if storage.total_bytes > STORAGE_LIMIT_BYTES {
            issues.push("high storage usage".to_string());
        }
        let status = match issues.len() {
            0 => IndexHealth::Healthy,
            1 => IndexHealth::Degraded,
            _ => IndexHealth::Unhealthy,
        };

        Ok(HealthReport {
            total_terms,
            total_documents,
            avg_term_frequency,
            high_frequency_terms: high,
            medium_frequency_terms: medium,
            low_frequency_terms: low,
            storage,
            issues,
            status,
            generated_at: now_ms(),
        })
    }

    /// Sampled size proxy: value length plus key length, per key kind,
    /// extrapolated from at most `STORAGE_SAMPLE` keys.
    pub async fn estimate_storage(&self) -> Result<StorageEstimate, TaskError> {
        let posting_keys = self.kv.scan("posting:*", SCAN_LIMIT * 10).await?;
        let meta_keys = self.kv.scan("meta:*", SCAN_LIMIT).await?;

        let postings_bytes = self
            .extrapolate(&posting_keys, STORAGE_SAMPLE / 2)
            .await?;
        let metadata_bytes = self.extrapolate(&meta_keys, STORAGE_SAMPLE / 2).await?;
        let sampled = posting_keys.len().min(STORAGE_SAMPLE / 2)
            + meta_keys.len().min(STORAGE_SAMPLE / 2);

        Ok(StorageEstimate {
            sampled_keys: sampled,
            postings_bytes,
            metadata_bytes,
            total_bytes: postings_bytes + metadata_bytes,
        })
    }

    async fn extrapolate(&self, keys: &[String], sample: usize) -> Result<u64, TaskError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let sampled = &keys[..keys.len().min(sample.max(1))];

        let mut bytes = 0u64;
        for key in sampled {
            bytes += self.key_size(key).await?;
        }
        Ok(bytes * keys.len() as u64 / sampled.len() as u64)
    }

    async fn key_size(&self, key: &str) -> Result<u64, TaskError> {
        let mut size = key.len() as u64;
        match self.kv.key_kind(key).await? {
            Some(KeyKind::String) => {
                if let Some(value) = self.kv.get(key).await? {
                    size += value.len() as u64;
                }
            }
            Some(KeyKind::Hash) => {
                for (field, value) in self.kv.hgetall(key).await? {
                    size += (field.len() + value.len()) as u64;
                }
            }
            Some(KeyKind::SortedSet) => {
                for entry in self.kv.zrange(key, 0, -1, false).await? {
                    size += entry.member.len() as u64 + 8;
                }
            }
            None => {}
        }
        Ok(size)
    }
}

/// Strip null fields and ellipsize oversized strings. Returns the
/// compacted value and whether anything changed.
fn compact_value(value: serde_json::Value) -> (serde_json::Value, bool) {
    match value {
        serde_json::Value::Object(map) => {
            let mut changed = false;
            let mut out = serde_json::Map::new();
            for (field, entry) in map {
                if entry.is_null() {
                    changed = true;
                    continue;
                }
                if let serde_json::Value::String(s) = &entry {
                    if s.chars().count() > MAX_META_STRING {
                        out.insert(field, serde_json::Value::String(ellipsize(s)));
                        changed = true;
                        continue;
                    }
                }
                out.insert(field, entry);
            }
            (serde_json::Value::Object(out), changed)
        }
        serde_json::Value::String(s) if s.chars().count() > MAX_META_STRING => {
            (serde_json::Value::String(ellipsize(&s)), true)
        }
        other => (other, false),
    }
}

fn ellipsize(s: &str) -> String {
    let mut out: String = s.chars().take(MAX_META_STRING - 3).collect();
    out.push_str("...");
    out
}
