//! In-memory queue and scripted transport for worker tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, FixedOffset, NaiveTime, TimeZone};
use rastro_core::error::{RastroError, Result};
use rastro_core::traits::Transport;
use rastro_core::types::{
    Channel, DispatchContext, Instant, NotificationStatus, RenderedMessage, ScheduledNotification,
};

use crate::dispatch::Clock;
use crate::queue::{DispatchGate, JobOutcome, NotificationQueue};

/// Error recorded on a job whose lease ran out mid-send.
pub const LEASE_EXPIRED: &str = "lease expired during send; delivery unknown";

pub fn local(day: u32, hour: u32) -> Instant {
    FixedOffset::west_opt(3 * 3600)
        .unwrap()
        .with_ymd_and_hms(2026, 10, day, hour, 0, 0)
        .unwrap()
}

pub fn fixture_job(id: &str, due_at: Instant) -> ScheduledNotification {
    ScheduledNotification {
        id: id.into(),
        tracking_id: "t1".into(),
        owner_id: "u1".into(),
        channel: Channel::Email,
        target: "ana@example.com".into(),
        due_at,
        status: NotificationStatus::Pending,
        attempts: 0,
        last_error: None,
    }
}

/// Clock that only moves when told to.
pub struct ManualClock(Mutex<Instant>);

impl ManualClock {
    pub fn at(start: Instant) -> Arc<Self> {
        Arc::new(Self(Mutex::new(start)))
    }

    pub fn set(&self, instant: Instant) {
        *self.0.lock().unwrap() = instant;
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug)]
struct Entry {
    job: ScheduledNotification,
    lease: Option<(String, Instant)>,
    in_flight: bool,
    updated_at: Instant,
}

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<HashMap<String, Entry>>,
    dead_trackings: Mutex<HashSet<String>>,
}

impl MemoryQueue {
    pub fn push(&self, job: ScheduledNotification) {
        self.entries.lock().unwrap().insert(
            job.id.clone(),
            Entry {
                updated_at: job.due_at,
                job,
                lease: None,
                in_flight: false,
            },
        );
    }

    pub fn kill_tracking(&self, tracking_id: &str) {
        self.dead_trackings.lock().unwrap().insert(tracking_id.into());
    }

    pub fn status(&self, id: &str) -> NotificationStatus {
        self.entries.lock().unwrap()[id].job.status
    }

    pub fn attempts(&self, id: &str) -> u32 {
        self.entries.lock().unwrap()[id].job.attempts
    }

    pub fn last_error(&self, id: &str) -> Option<String> {
        self.entries.lock().unwrap()[id].job.last_error.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(id)
    }
}

impl NotificationQueue for MemoryQueue {
    fn claim_due(
        &self,
        worker_id: &str,
        now: Instant,
        lease: Duration,
    ) -> Result<Option<ScheduledNotification>> {
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            let expired = entry.lease.as_ref().is_some_and(|(_, until)| *until <= now);
            if entry.in_flight && expired && entry.job.status == NotificationStatus::Pending {
                entry.job.status = NotificationStatus::Failed;
                entry.job.attempts += 1;
                entry.job.last_error = Some(LEASE_EXPIRED.into());
                entry.lease = None;
                entry.in_flight = false;
                entry.updated_at = now;
            }
        }
        let next = entries
            .values_mut()
            .filter(|e| e.job.status == NotificationStatus::Pending && e.job.due_at <= now)
            .filter(|e| !e.in_flight)
            .filter(|e| e.lease.as_ref().is_none_or(|(_, until)| *until <= now))
            .min_by_key(|e| (e.job.due_at, e.job.id.clone()));
        Ok(next.map(|e| {
            e.lease = Some((worker_id.to_string(), now + lease));
            e.updated_at = now;
            e.job.clone()
        }))
    }

    fn begin_dispatch(&self, job_id: &str, worker_id: &str, now: Instant) -> Result<DispatchGate> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| RastroError::NotFound(job_id.into()))?;
        let leased = entry
            .lease
            .as_ref()
            .is_some_and(|(w, until)| w == worker_id && *until > now);
        if !leased || entry.job.status != NotificationStatus::Pending {
            return Ok(DispatchGate::LeaseLost);
        }
        if self.dead_trackings.lock().unwrap().contains(&entry.job.tracking_id) {
            entry.job.status = NotificationStatus::Cancelled;
            entry.lease = None;
            entry.updated_at = now;
            return Ok(DispatchGate::Cancelled);
        }
        entry.in_flight = true;
        entry.updated_at = now;
        Ok(DispatchGate::Proceed(DispatchContext {
            customer_name: "Ana".into(),
            tracking_code: "BRABC123XYZ".into(),
            subject: "Seu pedido".into(),
            message_template: "Olá {nome_cliente}: {link_rastreamento}".into(),
            window_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        }))
    }

    fn complete(&self, job_id: &str, worker_id: &str, outcome: &JobOutcome, now: Instant) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(job_id)
            .ok_or_else(|| RastroError::NotFound(job_id.into()))?;
        // Outcomes from a worker that lost the lease are dropped.
        if entry.lease.as_ref().map(|(w, _)| w.as_str()) != Some(worker_id) {
            return Ok(());
        }
        entry.job.attempts += 1;
        entry.lease = None;
        entry.in_flight = false;
        entry.updated_at = now;
        match outcome {
            JobOutcome::Sent => {
                entry.job.status = NotificationStatus::Sent;
                entry.job.last_error = None;
            }
            JobOutcome::Retry { due_at, error } => {
                entry.job.due_at = *due_at;
                entry.job.last_error = Some(error.clone());
            }
            JobOutcome::Failed { error } => {
                entry.job.status = NotificationStatus::Failed;
                entry.job.last_error = Some(error.clone());
            }
        }
        Ok(())
    }

    fn release(&self, worker_id: &str) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let mut released = 0;
        for entry in entries.values_mut() {
            let owned = entry.lease.as_ref().is_some_and(|(w, _)| w == worker_id);
            if owned && !entry.in_flight && entry.job.status == NotificationStatus::Pending {
                entry.lease = None;
                released += 1;
            }
        }
        Ok(released)
    }

    fn purge_settled(&self, before: Instant) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let count = entries.len();
        entries.retain(|_, e| e.job.status == NotificationStatus::Pending || e.updated_at >= before);
        Ok(count - entries.len())
    }
}

enum Script {
    Ok,
    Fail(fn() -> RastroError),
    Hang,
}

/// Transport that records every send and answers from a fixed script.
pub struct ScriptedTransport {
    script: Script,
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl ScriptedTransport {
    pub fn ok() -> Self {
        Self::with(Script::Ok)
    }

    pub fn always(error: fn() -> RastroError) -> Self {
        Self::with(Script::Fail(error))
    }

    pub fn hanging() -> Self {
        Self::with(Script::Hang)
    }

    fn with(script: Script) -> Self {
        Self {
            script,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _channel: Channel, target: &str, message: &RenderedMessage) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), message.clone()));
        match self.script {
            Script::Ok => Ok(()),
            Script::Fail(error) => Err(error()),
            Script::Hang => {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}
