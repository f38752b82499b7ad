//! Dispatcher pool — N workers ticking on `tokio::time::interval`, plus a janitor.
//! Sleeps between polls; a shutdown signal stops every loop and returns unsent leases.

use std::sync::Arc;

use rastro_core::traits::Transport;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatch::{DispatchReport, DispatchWorker, WorkerSettings};
use crate::queue::NotificationQueue;

/// Counters accumulated by one worker loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sent: u64,
    pub retried: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl WorkerStats {
    fn record(&mut self, report: &DispatchReport) {
        match report {
            DispatchReport::Sent { .. } => self.sent += 1,
            DispatchReport::Retrying { .. } => self.retried += 1,
            DispatchReport::Failed { .. } => self.failed += 1,
            DispatchReport::Cancelled { .. } => self.cancelled += 1,
            DispatchReport::Idle | DispatchReport::Skipped { .. } => {}
        }
    }

    fn merge(&mut self, other: WorkerStats) {
        self.sent += other.sent;
        self.retried += other.retried;
        self.failed += other.failed;
        self.cancelled += other.cancelled;
    }
}

/// Poll the queue until shutdown. Storage errors are logged and the loop keeps going.
pub async fn run_worker(worker: DispatchWorker, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut interval = tokio::time::interval(worker.settings().poll_interval);
    tracing::info!(
        "⏰ Dispatch worker {} started (poll every {:?})",
        worker.id(),
        worker.settings().poll_interval
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        match worker.drain().await {
            Ok(reports) => reports.iter().for_each(|r| stats.record(r)),
            Err(e) => tracing::error!("[{}] dispatch tick failed: {}", worker.id(), e),
        }
    }

    match worker.release().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("[{}] released {} leased notifications", worker.id(), n),
        Err(e) => tracing::warn!("⚠️ [{}] failed to release leases: {}", worker.id(), e),
    }
    tracing::info!("🛑 Dispatch worker {} stopped", worker.id());
    stats
}

/// Delete settled jobs older than the retention window, every twentieth poll interval.
async fn run_janitor(
    queue: Arc<dyn NotificationQueue>,
    settings: WorkerSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    // Purging does not need to keep pace with dispatch.
    let period = settings.poll_interval * 20;
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let cutoff = settings.now() - settings.retention;
        let queue = Arc::clone(&queue);
        match tokio::task::spawn_blocking(move || queue.purge_settled(cutoff)).await {
            Ok(Ok(0)) => {}
            Ok(Ok(n)) => tracing::debug!("🧹 Purged {} settled notifications", n),
            Ok(Err(e)) => tracing::warn!("⚠️ Notification purge failed: {}", e),
            Err(e) => tracing::error!("Notification purge task failed: {}", e),
        }
    }
}

/// Running set of dispatch workers.
pub struct DispatcherPool {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<WorkerStats>>,
    janitor: JoinHandle<()>,
}

impl DispatcherPool {
    /// Spawn `worker_count` workers (at least one) sharing `queue` and `transport`.
    pub fn spawn(
        worker_count: usize,
        queue: Arc<dyn NotificationQueue>,
        transport: Arc<dyn Transport>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker_count = worker_count.max(1);
        let pid = std::process::id();

        let workers = (0..worker_count)
            .map(|i| {
                let worker = DispatchWorker::new(
                    format!("worker-{pid}-{i}"),
                    queue.clone(),
                    transport.clone(),
                    settings.clone(),
                );
                tokio::spawn(run_worker(worker, shutdown_rx.clone()))
            })
            .collect();
        let janitor = tokio::spawn(run_janitor(queue, settings, shutdown_rx));

        tracing::info!("🚀 Dispatcher pool started with {} workers", worker_count);
        Self {
            shutdown_tx,
            workers,
            janitor,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every loop to stop and wait for them. In-progress sends finish first.
    pub async fn shutdown(self) -> WorkerStats {
        self.shutdown_tx.send(true).ok();
        let mut total = WorkerStats::default();
        for result in futures::future::join_all(self.workers).await {
            match result {
                Ok(stats) => total.merge(stats),
                Err(e) => tracing::error!("Dispatch worker panicked: {}", e),
            }
        }
        if let Err(e) = self.janitor.await {
            tracing::error!("Notification janitor panicked: {}", e);
        }
        tracing::info!(
            "🛑 Dispatcher pool stopped (sent {}, retried {}, failed {}, cancelled {})",
            total.sent,
            total.retried,
            total.failed,
            total.cancelled
        );
        total
    }
}
