//! Mail Processing Module
//!
//! The email-domain task handlers registered with the executor. Each
//! handler validates its own payload (invalid payloads are fatal, never
//! retried) and is idempotent under replay: a task may run more than once
//! across retries and crashes.
//!
//! ## Submodules
//! - **`types`**: the typed payload per task kind, plus shared records.
//! - **`classify`**: priority / category / spam heuristics for inbound
//!   mail.
//! - **`process`**: inbound normalization (`process_email`) and thread
//!   mutation (`update_thread`).
//! - **`outbound`**: delivery (`send_email`) and user notifications
//!   (`send_notification`).
//! - **`attachments`**: attachment validation and blob storage
//!   (`process_attachments`).
//! - **`maintenance`**: analytics aggregation (`generate_analytics`) and
//!   retention cleanup (`cleanup_storage`).

pub mod attachments;
pub mod classify;
pub mod maintenance;
pub mod outbound;
pub mod process;
pub mod types;
