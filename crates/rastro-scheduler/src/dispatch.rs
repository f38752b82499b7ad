//! Dispatch worker — claims due jobs, renders them, calls the transport, records outcome.
//!
//! Per job: `Pending → Sent | Failed | Cancelled`. A transient failure re-queues the job as
//! `Pending` with `attempts + 1` and an exponential backoff until the retry policy is
//! exhausted, at which point it becomes a terminal failure.

use std::sync::Arc;

use chrono::{Duration, FixedOffset, Utc};
use rastro_core::config::{DispatchConfig, RastroConfig};
use rastro_core::error::{RastroError, Result};
use rastro_core::traits::Transport;
use rastro_core::types::{DispatchContext, Instant, ScheduledNotification};
use rastro_timeline::calendar;

use crate::notify;
use crate::queue::{DispatchGate, JobOutcome, NotificationQueue};

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, after `attempts_made` attempts failed.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(20);
        let factor = 1i32 << exponent;
        let delay = self.base_delay * factor;
        delay.min(self.max_delay)
    }

    pub fn exhausted(&self, attempts_made: u32) -> bool {
        attempts_made >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::seconds(config.backoff_base_secs as i64),
            max_delay: Duration::seconds(config.backoff_max_secs as i64),
        }
    }
}

/// Worker tuning shared by the pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub public_tracking_url: String,
    pub offset: FixedOffset,
    pub send_timeout: std::time::Duration,
    pub lease: Duration,
    pub poll_interval: std::time::Duration,
    pub retention: Duration,
    pub retry: RetryPolicy,
}

impl WorkerSettings {
    pub fn from_config(config: &RastroConfig) -> Result<Self> {
        let dispatch = &config.dispatch;
        Ok(Self {
            public_tracking_url: config.public_tracking_url.clone(),
            offset: config.utc_offset()?,
            send_timeout: std::time::Duration::from_secs(dispatch.send_timeout_secs),
            lease: Duration::seconds(dispatch.lease_secs as i64),
            poll_interval: std::time::Duration::from_secs(dispatch.poll_interval_secs.max(1)),
            retention: Duration::hours(dispatch.retention_hours as i64),
            retry: RetryPolicy::from(dispatch),
        })
    }

    /// Current local instant.
    pub fn now(&self) -> Instant {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Source of the current instant for claims, leases and backoff.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock in the merchant's offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock(pub FixedOffset);

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Utc::now().with_timezone(&self.0)
    }
}

/// What one `run_once` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchReport {
    /// Nothing due.
    Idle,
    Sent { job_id: String },
    Retrying { job_id: String, due_at: Instant },
    Failed { job_id: String, error: String },
    Cancelled { job_id: String },
    /// Lease expired before the send began; another worker owns the job.
    Skipped { job_id: String },
}

/// A single dispatch worker. Several may share one queue.
pub struct DispatchWorker {
    id: String,
    queue: Arc<dyn NotificationQueue>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    settings: WorkerSettings,
}

impl DispatchWorker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn NotificationQueue>,
        transport: Arc<dyn Transport>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            transport,
            clock: Arc::new(SystemClock(settings.offset)),
            settings,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn queue(&self) -> &Arc<dyn NotificationQueue> {
        &self.queue
    }

    /// Run a queue call on the blocking pool; the store is synchronous.
    async fn with_queue<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn NotificationQueue) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || f(&*queue))
            .await
            .map_err(|e| RastroError::Storage(format!("queue task failed: {e}")))?
    }

    /// Claim and process at most one job due now. Every queue call reads the clock afresh,
    /// so a lease always starts when the job is actually claimed.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let claimed_at = self.clock.now();
        let (worker_id, lease) = (self.id.clone(), self.settings.lease);
        let claimed = self
            .with_queue(move |q| q.claim_due(&worker_id, claimed_at, lease))
            .await?;
        let Some(job) = claimed else {
            return Ok(DispatchReport::Idle);
        };

        let (job_id, worker_id, started_at) = (job.id.clone(), self.id.clone(), self.clock.now());
        let gate = self
            .with_queue(move |q| q.begin_dispatch(&job_id, &worker_id, started_at))
            .await?;
        let context = match gate {
            DispatchGate::Proceed(context) => context,
            DispatchGate::Cancelled => {
                tracing::info!("🚫 [{}] notification {} cancelled before send", self.id, job.id);
                return Ok(DispatchReport::Cancelled { job_id: job.id });
            }
            DispatchGate::LeaseLost => {
                tracing::debug!("[{}] lease on {} lost before send", self.id, job.id);
                return Ok(DispatchReport::Skipped { job_id: job.id });
            }
        };

        let message = notify::render(&context, &self.settings.public_tracking_url);
        tracing::info!(
            "📤 [{}] sending {} notification {} (attempt {})",
            self.id,
            job.channel,
            job.id,
            job.attempts + 1
        );

        // No queue lock is held across the send.
        let sent = tokio::time::timeout(
            self.settings.send_timeout,
            self.transport.send(job.channel, &job.target, &message),
        )
        .await;
        let finished_at = self.clock.now();

        let outcome = match sent {
            Ok(Ok(())) => JobOutcome::Sent,
            Ok(Err(e)) if e.is_transient() => {
                self.retry_or_fail(&job, &context, e.to_string(), finished_at)
            }
            Ok(Err(e)) => JobOutcome::Failed {
                error: e.to_string(),
            },
            Err(_) => self.retry_or_fail(
                &job,
                &context,
                format!("send timed out after {:?}", self.settings.send_timeout),
                finished_at,
            ),
        };

        let (job_id, worker_id, recorded) = (job.id.clone(), self.id.clone(), outcome.clone());
        self.with_queue(move |q| q.complete(&job_id, &worker_id, &recorded, finished_at))
            .await?;

        Ok(match outcome {
            JobOutcome::Sent => {
                tracing::info!("✅ [{}] notification {} sent", self.id, job.id);
                DispatchReport::Sent { job_id: job.id }
            }
            JobOutcome::Retry { due_at, error } => {
                tracing::warn!(
                    "⚠️ [{}] notification {} failed ({}), retrying at {}",
                    self.id,
                    job.id,
                    error,
                    due_at.to_rfc3339()
                );
                DispatchReport::Retrying {
                    job_id: job.id,
                    due_at,
                }
            }
            JobOutcome::Failed { error } => {
                tracing::warn!("❌ [{}] notification {} failed: {}", self.id, job.id, error);
                DispatchReport::Failed {
                    job_id: job.id,
                    error,
                }
            }
        })
    }

    /// Backoff counts from the moment the failed send returned.
    fn retry_or_fail(
        &self,
        job: &ScheduledNotification,
        context: &DispatchContext,
        error: String,
        finished_at: Instant,
    ) -> JobOutcome {
        let attempts_made = job.attempts + 1;
        let policy = &self.settings.retry;
        if policy.exhausted(attempts_made) {
            return JobOutcome::Failed {
                error: format!("gave up after {attempts_made} attempts: {error}"),
            };
        }
        let retry_at = finished_at + policy.delay_for(attempts_made);
        JobOutcome::Retry {
            due_at: calendar::next_time_in_window(retry_at, context.window_start, context.window_end),
            error,
        }
    }

    /// Process due jobs until the queue is idle.
    pub async fn drain(&self) -> Result<Vec<DispatchReport>> {
        let mut reports = Vec::new();
        loop {
            match self.run_once().await? {
                DispatchReport::Idle => return Ok(reports),
                report => reports.push(report),
            }
        }
    }

    /// Hand back every job this worker claimed but has not started.
    pub async fn release(&self) -> Result<usize> {
        let worker_id = self.id.clone();
        self.with_queue(move |q| q.release(&worker_id)).await
    }
}
