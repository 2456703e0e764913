//! Email-Processing Backend Library
//!
//! This library crate defines the core modules of the mailroom backend.
//! It serves as the foundation for the worker daemon binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`storage`**: The durable coordination layer. An abstraction over a remote
//!   key-value store (strings, hashes, sorted sets, pipelined writes) with an
//!   in-memory backend for tests and a Redis backend for production, plus the
//!   distributed lock manager built on top of it.
//! - **`executor`**: The background task engine. Durable priority queues, the
//!   scheduler (enqueue / lease / retry / dead-letter), the typed handler
//!   registry, and the worker pool with lease supervision.
//! - **`mail`**: The email-domain task handlers: inbound processing and
//!   classification, outbound delivery, attachment handling, analytics
//!   aggregation, storage cleanup, and notifications.
//! - **`search`**: The information retrieval pipeline. Tokenizers, the inverted
//!   index writer, the query engine (scoring, filtering, fuzzy matching), and
//!   the background index optimizer with health analysis.
//! - **`alerts`**: Operational health signals. Periodic checks over the queue,
//!   the index, and the collaborators, persisted as alert records.
//! - **`external`**: Narrow interfaces to external collaborators (document
//!   store, blob store, outbound mail transport, notification sinks) together
//!   with in-memory implementations used by tests and the default wiring.

pub mod alerts;
pub mod config;
pub mod executor;
pub mod external;
pub mod mail;
pub mod search;
pub mod storage;
