//! # Rastro Scheduler
//!
//! Turns automation settings into time-gated notification jobs and drains them with a
//! pool of dispatch workers.
//!
//! ## Design Principles
//! - No external broker: the job queue lives in the same SQLite file as the trackings
//! - Lease-based claims, so N workers never send the same job twice
//! - Tokio timers only, idle workers just sleep; store calls run on the blocking pool
//! - Transport-agnostic: workers talk to a `rastro_core::traits::Transport`
//!
//! ## Architecture
//! ```text
//! order confirmed ─→ notify::schedule ─→ ScheduledNotification (pending, due_at)
//!
//! DispatcherPool (tokio interval per worker)
//!   ├── claim_due      → lease earliest due job
//!   ├── begin_dispatch → re-check tracking/setting, mark in flight
//!   ├── Transport.send (timeout)
//!   └── complete       → sent | retry(backoff, windowed) | failed
//! ```

pub mod dispatch;
pub mod engine;
pub mod notify;
pub mod queue;

#[cfg(test)]
mod testing;

pub use dispatch::{Clock, DispatchReport, DispatchWorker, RetryPolicy, SystemClock, WorkerSettings};
pub use engine::{DispatcherPool, WorkerStats};
pub use queue::{DispatchGate, JobOutcome, NotificationQueue};
