//! Storage Module Tests
//!
//! Exercises the in-memory substrate backend against the semantics the
//! core depends on: set-if-absent with expiry, sorted-set ordering and
//! tie-breaks, pipelined writes, and the lock manager's fencing rules.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::storage::lock::LockManager;
    use crate::storage::memory::MemoryKv;
    use crate::storage::store::KvStore;
    use crate::storage::types::{KeyKind, KvOp};

    // ============================================================
    // STRINGS + TTL
    // ============================================================

    #[tokio::test]
    async fn test_set_get_del() {
        let kv = MemoryKv::new();

        kv.set("greeting", "hello").await.unwrap();
        assert_eq!(kv.get("greeting").await.unwrap().as_deref(), Some("hello"));

        assert!(kv.del("greeting").await.unwrap());
        assert_eq!(kv.get("greeting").await.unwrap(), None);
        assert!(!kv.del("greeting").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_nx_ex_claims_once() {
        let kv = MemoryKv::new();

        assert!(kv
            .set_nx_ex("claim", "a", Duration::from_secs(30))
            .await
            .unwrap());
        // Second claim fails while the first is alive.
        assert!(!kv
            .set_nx_ex("claim", "b", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(kv.get("claim").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_nx_ex_succeeds_after_expiry() {
        let kv = MemoryKv::new();

        assert!(kv
            .set_nx_ex("claim", "a", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv
            .set_nx_ex("claim", "b", Duration::from_secs(30))
            .await
            .unwrap());
        assert_eq!(kv.get("claim").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_expired_value_is_gone() {
        let kv = MemoryKv::new();

        kv.set_ex("ephemeral", "x", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(kv.ttl("ephemeral").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(kv.get("ephemeral").await.unwrap(), None);
        assert_eq!(kv.ttl("ephemeral").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_key_kind() {
        let kv = MemoryKv::new();

        kv.set("s", "v").await.unwrap();
        kv.hset("h", "f", "v").await.unwrap();
        kv.zadd("z", "m", 1.0).await.unwrap();

        assert_eq!(kv.key_kind("s").await.unwrap(), Some(KeyKind::String));
        assert_eq!(kv.key_kind("h").await.unwrap(), Some(KeyKind::Hash));
        assert_eq!(kv.key_kind("z").await.unwrap(), Some(KeyKind::SortedSet));
        assert_eq!(kv.key_kind("missing").await.unwrap(), None);
    }

    // ============================================================
    // HASHES
    // ============================================================

    #[tokio::test]
    async fn test_hash_operations() {
        let kv = MemoryKv::new();

        kv.hset("status", "t1", "pending").await.unwrap();
        kv.hset("status", "t2", "completed").await.unwrap();

        assert_eq!(
            kv.hget("status", "t1").await.unwrap().as_deref(),
            Some("pending")
        );
        assert_eq!(kv.hlen("status").await.unwrap(), 2);

        let all = kv.hgetall("status").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["t2"], "completed");

        assert!(kv.hdel("status", "t1").await.unwrap());
        assert_eq!(kv.hget("status", "t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_hincr() {
        let kv = MemoryKv::new();

        assert_eq!(kv.hincr("counters", "email", 1).await.unwrap(), 1);
        assert_eq!(kv.hincr("counters", "email", 2).await.unwrap(), 3);
        assert_eq!(kv.hincr("counters", "email", -3).await.unwrap(), 0);
    }

    // ============================================================
    // SORTED SETS
    // ============================================================

    #[tokio::test]
    async fn test_zset_ordering_and_pop_min() {
        let kv = MemoryKv::new();

        kv.zadd("q", "c", 3.0).await.unwrap();
        kv.zadd("q", "a", 1.0).await.unwrap();
        kv.zadd("q", "b", 2.0).await.unwrap();

        assert_eq!(kv.zcard("q").await.unwrap(), 3);
        assert_eq!(kv.zscore("q", "b").await.unwrap(), Some(2.0));

        let popped = kv.zpop_min("q").await.unwrap().unwrap();
        assert_eq!(popped.member, "a");
        assert_eq!(popped.score, 1.0);
        assert_eq!(kv.zcard("q").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_zset_equal_scores_tie_break_on_member() {
        let kv = MemoryKv::new();

        kv.zadd("q", "beta", 5.0).await.unwrap();
        kv.zadd("q", "alpha", 5.0).await.unwrap();

        let popped = kv.zpop_min("q").await.unwrap().unwrap();
        assert_eq!(popped.member, "alpha");
    }

    #[tokio::test]
    async fn test_zrange_negative_indices_and_rev() {
        let kv = MemoryKv::new();

        for (member, score) in [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)] {
            kv.zadd("q", member, score).await.unwrap();
        }

        let all = kv.zrange("q", 0, -1, false).await.unwrap();
        let members: Vec<&str> = all.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c", "d"]);

        let newest_first = kv.zrange("q", 0, 1, true).await.unwrap();
        let members: Vec<&str> = newest_first.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(members, vec!["d", "c"]);
    }

    #[tokio::test]
    async fn test_zrange_by_score_window() {
        let kv = MemoryKv::new();

        for (member, score) in [("a", 10.0), ("b", 20.0), ("c", 30.0)] {
            kv.zadd("due", member, score).await.unwrap();
        }

        let due = kv.zrange_by_score("due", f64::NEG_INFINITY, 20.0).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].member, "a");
        assert_eq!(due[1].member, "b");
    }

    #[tokio::test]
    async fn test_zadd_updates_score() {
        let kv = MemoryKv::new();

        kv.zadd("q", "a", 1.0).await.unwrap();
        kv.zadd("q", "a", 9.0).await.unwrap();

        assert_eq!(kv.zcard("q").await.unwrap(), 1);
        assert_eq!(kv.zscore("q", "a").await.unwrap(), Some(9.0));
    }

    // ============================================================
    // SCAN + PIPELINE
    // ============================================================

    #[tokio::test]
    async fn test_scan_by_pattern() {
        let kv = MemoryKv::new();

        kv.zadd("posting:hello", "email:1", 1.0).await.unwrap();
        kv.zadd("posting:world", "email:1", 1.0).await.unwrap();
        kv.hset("meta:email", "1", "{}").await.unwrap();

        let mut keys = kv.scan("posting:*", 100).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["posting:hello", "posting:world"]);

        let bounded = kv.scan("posting:*", 1).await.unwrap();
        assert_eq!(bounded.len(), 1);
    }

    #[tokio::test]
    async fn test_pipeline_applies_in_order() {
        let kv = MemoryKv::new();

        kv.zadd("ready", "task", 1.0).await.unwrap();
        kv.pipeline(vec![
            KvOp::ZRem {
                key: "ready".into(),
                member: "task".into(),
            },
            KvOp::ZAdd {
                key: "processing".into(),
                member: "task".into(),
                score: 2.0,
            },
            KvOp::HSet {
                key: "status".into(),
                field: "task".into(),
                value: "processing".into(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(kv.zcard("ready").await.unwrap(), 0);
        assert_eq!(kv.zscore("processing", "task").await.unwrap(), Some(2.0));
        assert_eq!(
            kv.hget("status", "task").await.unwrap().as_deref(),
            Some("processing")
        );
    }

    // ============================================================
    // LOCK MANAGER
    // ============================================================

    #[tokio::test]
    async fn test_lock_exclusive_until_released() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let locks = LockManager::new(kv);

        let token = locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .expect("first acquire succeeds");

        assert!(locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        assert!(locks.release("doc:d1", &token).await.unwrap());
        assert!(locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_lock_release_requires_fencing_token() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let locks = LockManager::new(kv);

        locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // A stale or foreign token must not release the lock.
        assert!(!locks.release("doc:d1", "not-the-token").await.unwrap());
        assert!(locks
            .acquire("doc:d1", Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lock_expires_and_renew() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let locks = LockManager::new(kv);

        let token = locks
            .acquire("opt", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        assert!(locks
            .renew("opt", &token, Duration::from_millis(30))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Expired: renewal fails and the lock is free again.
        assert!(!locks
            .renew("opt", &token, Duration::from_secs(1))
            .await
            .unwrap());
        assert!(locks
            .acquire("opt", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
}
