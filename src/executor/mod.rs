//! Background Task Executor Module
//!
//! A durable, priority-ordered, retry-aware task engine over the key-value
//! substrate. Producers enqueue typed tasks; worker loops lease them one at
//! a time, dispatch to registered handlers, and record the outcome.
//!
//! ## Architecture Overview
//! The executor follows a **pull-based** model with **lease** supervision:
//! 1. **Enqueue**: a task record lands in the `ready` or `scheduled` sorted
//!    set, mirrored for random access, with its status tracked in a hash.
//! 2. **Lease**: workers promote due scheduled tasks, pop the best ready
//!    task, and move it into `processing` (score = lease time).
//! 3. **Execution**: the handler registry dispatches by task kind under a
//!    per-task timeout; a background renewal keeps the lease fresh.
//! 4. **Outcome**: success completes the task (and enqueues dependents);
//!    failure retries with exponential backoff until the attempt budget is
//!    spent, then dead-letters it. A reaper returns abandoned leases to the
//!    queue, giving at-least-once semantics.
//!
//! ## Submodules
//! - **`types`**: the durable task record, status codes, retry policy, and
//!   the error taxonomy the retry decision is based on.
//! - **`queue`**: the scheduler owning the queue partitions.
//! - **`registry`**: maps task kinds to typed handlers.
//! - **`executor`**: the worker pool, lease renewal, and the stale-lease
//!   reaper.

pub mod executor;
pub mod queue;
pub mod registry;
pub mod types;

#[cfg(test)]
mod tests;
