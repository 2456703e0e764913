//! Distributed Lock Manager
//!
//! Named, fenced, TTL'd leases built on the substrate's atomic
//! set-if-absent primitive. A lock is held iff `SET lock:{name} token NX
//! PX ttl` succeeded; the fencing token proves ownership on release and
//! renewal, so an expired holder cannot delete a lock someone else has
//! since acquired.

use std::sync::Arc;
use std::time::Duration;

use crate::storage::store::{KvError, KvStore};

#[derive(Clone)]
pub struct LockManager {
    kv: Arc<dyn KvStore>,
}

fn lock_key(name: &str) -> String {
    format!("lock:{}", name)
}

impl LockManager {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Try to take the lock. Returns the fencing token on success, `None`
    /// when another holder is alive.
    pub async fn acquire(&self, name: &str, ttl: Duration) -> Result<Option<String>, KvError> {
        let token = uuid::Uuid::new_v4().to_string();
        let acquired = self.kv.set_nx_ex(&lock_key(name), &token, ttl).await?;
        if acquired {
            tracing::debug!("Acquired lock {} ({:?})", name, ttl);
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    /// Release only if we still own the lock; a stale token is a no-op.
    pub async fn release(&self, name: &str, token: &str) -> Result<bool, KvError> {
        let key = lock_key(name);
        match self.kv.get(&key).await? {
            Some(current) if current == token => {
                self.kv.del(&key).await?;
                Ok(true)
            }
            _ => {
                tracing::debug!("Skipped release of lock {}: token no longer current", name);
                Ok(false)
            }
        }
    }

    /// Extend the TTL of a lock we still hold.
    pub async fn renew(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, KvError> {
        let key = lock_key(name);
        match self.kv.get(&key).await? {
            Some(current) if current == token => self.kv.expire(&key, ttl).await,
            _ => Ok(false),
        }
    }
}
