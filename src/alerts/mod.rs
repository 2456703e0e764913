//! Alerting Module
//!
//! Operational health signals synthesized from the queue, the index, and
//! the collaborators, persisted in the key-value substrate so every node
//! sees the same picture.
//!
//! ## Submodules
//! - **`types`**: alert records, severities, and lifecycle states.
//! - **`store`**: the durable alert log (`alerts` sorted set + per-alert
//!   hashes) with acknowledge/resolve transitions.
//! - **`monitor`**: the periodic health monitor converting threshold
//!   violations into alerts.

pub mod monitor;
pub mod store;
pub mod types;
