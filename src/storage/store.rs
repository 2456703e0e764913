//! Key-Value Substrate Contract
//!
//! The primitives every backend must provide. The core never talks to a
//! concrete store directly; schedulers, indexers, and monitors all hold an
//! `Arc<dyn KvStore>`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{KeyKind, KvOp, ScoredMember};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),

    #[error("kv command error: {0}")]
    Command(String),

    #[error("wrong kind for key {key}: expected {expected}")]
    WrongKind { key: String, expected: &'static str },
}

#[async_trait]
pub trait KvStore: Send + Sync {
    // --- Strings ---

    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// Set with a TTL in one round-trip.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// `SET key value NX EX ttl`. Returns whether the key was written. This
    /// is the atomic claim primitive the lock manager is built on.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError>;

    async fn del(&self, key: &str) -> Result<bool, KvError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError>;

    /// Remaining TTL, `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

    async fn key_kind(&self, key: &str) -> Result<Option<KeyKind>, KvError>;

    // --- Hashes ---

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

    async fn hlen(&self, key: &str) -> Result<usize, KvError>;

    /// Atomic signed increment of an integer hash field.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError>;

    // --- Sorted sets ---

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError>;

    async fn zcard(&self, key: &str) -> Result<usize, KvError>;

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, KvError>;

    /// Index range, inclusive, with Redis semantics for negative indices.
    /// `rev` walks from the highest score down.
    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        rev: bool,
    ) -> Result<Vec<ScoredMember>, KvError>;

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>, KvError>;

    /// Pop the lowest-scored member. Ties break on member bytes.
    async fn zpop_min(&self, key: &str) -> Result<Option<ScoredMember>, KvError>;

    // --- Keyspace ---

    /// Keys matching a glob pattern, bounded by `limit`.
    async fn scan(&self, pattern: &str, limit: usize) -> Result<Vec<String>, KvError>;

    /// Apply a batch of writes in one round-trip.
    async fn pipeline(&self, ops: Vec<KvOp>) -> Result<(), KvError>;
}
