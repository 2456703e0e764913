//! In-Memory Substrate Backend
//!
//! A process-local implementation of `KvStore` used by tests and local
//! development. Semantics mirror the Redis backend: lazy expiry on access,
//! lexicographic tie-break for equal sorted-set scores, and pipeline ops
//! applied in order.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::store::{KvError, KvStore};
use super::types::{glob_match, KeyKind, KvOp, ScoredMember};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Zset(HashMap<String, f64>),
}

impl Value {
    fn kind(&self) -> KeyKind {
        match self {
            Value::Str(_) => KeyKind::String,
            Value::Hash(_) => KeyKind::Hash,
            Value::Zset(_) => KeyKind::SortedSet,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<u64>,
}

impl Entry {
    fn expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    entries: DashMap<String, Entry>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Drops the entry if its TTL has lapsed, then hands it to `f`.
    fn with_live<T>(&self, key: &str, f: impl FnOnce(&Entry) -> T) -> Option<T> {
        let now = Self::now_ms();
        let guard = self.entries.get(key)?;
        if guard.expired(now) {
            drop(guard);
            self.entries.remove(key);
            return None;
        }
        Some(f(guard.value()))
    }

    fn with_live_mut<T>(&self, key: &str, f: impl FnOnce(&mut Entry) -> T) -> Option<T> {
        let now = Self::now_ms();
        let mut guard = self.entries.get_mut(key)?;
        if guard.expired(now) {
            drop(guard);
            self.entries.remove(key);
            return None;
        }
        Some(f(guard.value_mut()))
    }

    fn hash_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, String>) -> T,
    ) -> Result<T, KvError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        if entry.expired(Self::now_ms()) {
            *entry = Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            };
        }
        match &mut entry.value {
            Value::Hash(map) => Ok(f(map)),
            _ => Err(KvError::WrongKind {
                key: key.to_string(),
                expected: "hash",
            }),
        }
    }

    fn zset_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, f64>) -> T,
    ) -> Result<T, KvError> {
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Zset(HashMap::new()),
            expires_at: None,
        });
        if entry.expired(Self::now_ms()) {
            *entry = Entry {
                value: Value::Zset(HashMap::new()),
                expires_at: None,
            };
        }
        match &mut entry.value {
            Value::Zset(set) => Ok(f(set)),
            _ => Err(KvError::WrongKind {
                key: key.to_string(),
                expected: "zset",
            }),
        }
    }

    /// Members sorted by (score, member bytes), ascending.
    fn sorted_members(&self, key: &str) -> Vec<ScoredMember> {
        let mut members = self
            .with_live(key, |entry| match &entry.value {
                Value::Zset(set) => set
                    .iter()
                    .map(|(member, score)| ScoredMember::new(member.clone(), *score))
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();
        members.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.member.cmp(&b.member))
        });
        members
    }

    fn apply(&self, op: KvOp) -> Result<(), KvError> {
        match op {
            KvOp::Set { key, value } => {
                self.entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at: None,
                    },
                );
                Ok(())
            }
            KvOp::Del { key } => {
                self.entries.remove(&key);
                Ok(())
            }
            KvOp::HSet { key, field, value } => self.hash_mut(&key, |map| {
                map.insert(field, value);
            }),
            KvOp::HDel { key, field } => self.hash_mut(&key, |map| {
                map.remove(&field);
            }),
            KvOp::ZAdd { key, member, score } => self.zset_mut(&key, |set| {
                set.insert(member, score);
            }),
            KvOp::ZRem { key, member } => self.zset_mut(&key, |set| {
                set.remove(&member);
            }),
            KvOp::Expire { key, ttl } => {
                let deadline = Self::now_ms() + ttl.as_millis() as u64;
                self.with_live_mut(&key, |entry| entry.expires_at = Some(deadline));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Str(s) => Some(s.clone()),
                _ => None,
            })
            .flatten())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.apply(KvOp::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Self::now_ms() + ttl.as_millis() as u64),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, KvError> {
        let now = Self::now_ms();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Str(String::new()),
            expires_at: Some(0),
        });
        if entry.expired(now) {
            *entry = Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(now + ttl.as_millis() as u64),
            };
            return Ok(true);
        }
        Ok(false)
    }

    async fn del(&self, key: &str) -> Result<bool, KvError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let deadline = Self::now_ms() + ttl.as_millis() as u64;
        Ok(self
            .with_live_mut(key, |entry| entry.expires_at = Some(deadline))
            .is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
        let now = Self::now_ms();
        Ok(self
            .with_live(key, |entry| {
                entry
                    .expires_at
                    .map(|at| Duration::from_millis(at.saturating_sub(now)))
            })
            .flatten())
    }

    async fn key_kind(&self, key: &str) -> Result<Option<KeyKind>, KvError> {
        Ok(self.with_live(key, |entry| entry.value.kind()))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Hash(map) => map.get(field).cloned(),
                _ => None,
            })
            .flatten())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.hash_mut(key, |map| {
            map.insert(field.to_string(), value.to_string());
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, KvError> {
        self.hash_mut(key, |map| map.remove(field).is_some())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Hash(map) => map.clone(),
                _ => HashMap::new(),
            })
            .unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> Result<usize, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Hash(map) => map.len(),
                _ => 0,
            })
            .unwrap_or(0))
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
        self.hash_mut(key, |map| {
            let current = map
                .get(field)
                .and_then(|value| value.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + delta;
            map.insert(field.to_string(), next.to_string());
            next
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        self.zset_mut(key, |set| {
            set.insert(member.to_string(), score);
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
        self.zset_mut(key, |set| set.remove(member).is_some())
    }

    async fn zcard(&self, key: &str) -> Result<usize, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Zset(set) => set.len(),
                _ => 0,
            })
            .unwrap_or(0))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, KvError> {
        Ok(self
            .with_live(key, |entry| match &entry.value {
                Value::Zset(set) => set.get(member).copied(),
                _ => None,
            })
            .flatten())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
        rev: bool,
    ) -> Result<Vec<ScoredMember>, KvError> {
        let mut members = self.sorted_members(key);
        if rev {
            members.reverse();
        }
        let len = members.len() as isize;
        let clamp = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len)
            }
        };
        let from = clamp(start);
        let to = clamp(stop);
        if from >= len || to < from {
            return Ok(Vec::new());
        }
        let to = (to + 1).min(len);
        Ok(members[from as usize..to as usize].to_vec())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<ScoredMember>, KvError> {
        Ok(self
            .sorted_members(key)
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect())
    }

    async fn zpop_min(&self, key: &str) -> Result<Option<ScoredMember>, KvError> {
        let lowest = self.sorted_members(key).into_iter().next();
        if let Some(entry) = &lowest {
            self.zset_mut(key, |set| {
                set.remove(&entry.member);
            })?;
        }
        Ok(lowest)
    }

    async fn scan(&self, pattern: &str, limit: usize) -> Result<Vec<String>, KvError> {
        let now = Self::now_ms();
        let mut keys = Vec::new();
        for entry in self.entries.iter() {
            if keys.len() >= limit {
                break;
            }
            if !entry.value().expired(now) && glob_match(pattern, entry.key()) {
                keys.push(entry.key().clone());
            }
        }
        Ok(keys)
    }

    async fn pipeline(&self, ops: Vec<KvOp>) -> Result<(), KvError> {
        for op in ops {
            self.apply(op)?;
        }
        Ok(())
    }
}
