//! Durable Storage Module
//!
//! The key-value substrate is the only durable coordination medium for the
//! core: queue partitions, the inverted index, locks, alerts, and cached
//! statistics all live behind the same narrow interface.
//!
//! ## Core Concepts
//! - **`KvStore`**: the substrate trait. Strings (with set-if-absent +
//!   expiry), hashes, sorted sets, pattern scans, and pipelined write
//!   batches.
//! - **Backends**: `MemoryKv` (dashmap-based, used by tests and local
//!   development) and `RedisKv` (production, raw Redis commands).
//! - **Locks**: `LockManager` builds named, fenced, TTL'd leases out of the
//!   substrate's atomic set-if-absent primitive.

pub mod lock;
pub mod memory;
pub mod redis;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
