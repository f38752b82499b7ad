//! Durable notification queue contract consumed by the dispatch workers.
//!
//! Claims are lease-based: a claimed job stays `Pending` but is invisible to other workers
//! until its lease expires. `begin_dispatch` is the last liveness check before the send;
//! once it returns `Proceed`, cancellation no longer applies to that attempt.

use chrono::Duration;
use rastro_core::error::Result;
use rastro_core::types::{DispatchContext, Instant, ScheduledNotification};

/// Result of the pre-send liveness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchGate {
    /// Job is live and now marked in flight for this worker.
    Proceed(DispatchContext),
    /// Tracking deleted, setting inactive, or job already cancelled. Never sent.
    Cancelled,
    /// Lease expired and the job belongs to someone else now.
    LeaseLost,
}

/// Outcome recorded after an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Sent,
    /// Back to `Pending` with `attempts + 1`, due again at `due_at`.
    Retry { due_at: Instant, error: String },
    /// Terminal failure, surfaced to the owner.
    Failed { error: String },
}

/// Queue storage used by [`crate::dispatch::DispatchWorker`].
pub trait NotificationQueue: Send + Sync {
    /// Atomically lease the earliest due job. Jobs whose lease expired mid-send are
    /// settled as failed here instead of being handed out again.
    fn claim_due(
        &self,
        worker_id: &str,
        now: Instant,
        lease: Duration,
    ) -> Result<Option<ScheduledNotification>>;

    /// Re-check liveness and mark the job in flight.
    fn begin_dispatch(&self, job_id: &str, worker_id: &str, now: Instant) -> Result<DispatchGate>;

    /// Record the attempt outcome and drop the lease.
    fn complete(&self, job_id: &str, worker_id: &str, outcome: &JobOutcome, now: Instant)
    -> Result<()>;

    /// Return every job leased by `worker_id` but not yet in flight. Returns the count.
    fn release(&self, worker_id: &str) -> Result<usize>;

    /// Delete settled jobs last touched before `before`. Returns the count.
    fn purge_settled(&self, before: Instant) -> Result<usize>;
}
