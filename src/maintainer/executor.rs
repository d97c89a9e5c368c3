//! Background worker pool driving maintenance targets.
//!
//! A poller thread checks every registered [`MaintenanceTarget`] on a
//! fixed interval, prepares jobs for targets that report need (urgent
//! jobs are enqueued ahead of routine ones within a cycle), and hands
//! them to a crossbeam channel consumed by worker threads. Shutdown
//! cancels the shared token so running jobs stop at their next check,
//! then drains and joins the pool.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, unbounded, Sender};

use crate::error::Result;
use crate::maintainer::target::{CancelToken, MaintenanceJob, MaintenanceTarget};

/// Reference scheduler for flush and fusion targets.
pub struct MaintenanceExecutor {
    cancel: CancelToken,
    shutdown_tx: Option<Sender<()>>,
    poller: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl MaintenanceExecutor {
    /// Start with one worker per CPU.
    pub fn start(
        targets: Vec<Arc<dyn MaintenanceTarget>>,
        poll_interval: Duration,
    ) -> Result<Self> {
        Self::with_workers(targets, num_cpus::get().max(1), poll_interval)
    }

    /// Start with an explicit worker count.
    pub fn with_workers(
        targets: Vec<Arc<dyn MaintenanceTarget>>,
        worker_count: usize,
        poll_interval: Duration,
    ) -> Result<Self> {
        let cancel = CancelToken::new();
        let (job_tx, job_rx) = unbounded::<Box<dyn MaintenanceJob>>();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let mut workers = Vec::with_capacity(worker_count.max(1));
        for index in 0..worker_count.max(1) {
            let job_rx = job_rx.clone();
            let cancel = cancel.clone();
            let handle = thread::Builder::new()
                .name(format!("maintenance-{index}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let description = job.describe();
                        match job.run(&cancel) {
                            Ok(()) => {
                                tracing::debug!(job = %description, "maintenance job finished");
                            }
                            Err(e) if e.is_cancelled() => {
                                tracing::debug!(job = %description, "maintenance job cancelled");
                            }
                            Err(e) => {
                                tracing::warn!(job = %description, error = %e,
                                    "maintenance job failed");
                            }
                        }
                    }
                })?;
            workers.push(handle);
        }

        let poller = thread::Builder::new()
            .name("maintenance-poller".to_string())
            .spawn(move || {
                let ticker = tick(poll_interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            let mut prepared = Vec::new();
                            for target in &targets {
                                let need = target.poll();
                                if !need.needed {
                                    continue;
                                }
                                match target.prepare() {
                                    Ok(Some(job)) => prepared.push((need.urgent, job)),
                                    Ok(None) => {}
                                    Err(e) => tracing::warn!(target = target.name(),
                                        error = %e, "failed to prepare maintenance job"),
                                }
                            }
                            prepared.sort_by_key(|(urgent, _)| !*urgent);
                            for (_, job) in prepared {
                                if job_tx.send(job).is_err() {
                                    return;
                                }
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                // Dropping the sender lets the workers drain and exit.
            })?;

        Ok(MaintenanceExecutor {
            cancel,
            shutdown_tx: Some(shutdown_tx),
            poller: Some(poller),
            workers,
        })
    }

    /// Cancellation token shared with every running job.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Stop polling, cancel running jobs, and join all threads.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for MaintenanceExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
