//! Progress heartbeats on a side thread.
//!
//! The engine thread publishes reports into a one-slot
//! `crossbeam_queue::ArrayQueue`; a newer report overwrites one that has not
//! been sent yet. The reporter thread drains the slot and renews the lease,
//! so the arithmetic never waits on the network.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use perfectnet_engine::ProgressReport;
use perfectnet_types::{ErrorClass, Exponent, WorkerId};
use tracing::{debug, warn};

use crate::link::CoordinatorLink;

/// How long the reporter sleeps when nothing is pending.
const IDLE_PARK: Duration = Duration::from_millis(250);

/// Sends progress for one assignment. Stops and joins on drop.
pub struct Reporter {
    slot: Arc<ArrayQueue<ProgressReport>>,
    stop: Arc<AtomicBool>,
    lost: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(
        link: Arc<dyn CoordinatorLink>,
        worker: WorkerId,
        exponent: Exponent,
    ) -> std::io::Result<Self> {
        let slot = Arc::new(ArrayQueue::new(1));
        let stop = Arc::new(AtomicBool::new(false));
        let lost = Arc::new(AtomicBool::new(false));

        let thread = {
            let slot = Arc::clone(&slot);
            let stop = Arc::clone(&stop);
            let lost = Arc::clone(&lost);
            thread::Builder::new()
                .name(format!("perfectnet-reporter-{exponent}"))
                .spawn(move || {
                    report_loop(link.as_ref(), &worker, exponent, &slot, &stop, &lost);
                })?
        };

        Ok(Self {
            slot,
            stop,
            lost,
            thread: Some(thread),
        })
    }

    /// Queues a report, superseding any that has not gone out yet.
    pub fn publish(&self, report: ProgressReport) {
        if self.slot.force_push(report).is_some() {
            debug!("superseded an unsent progress report");
        }
        if let Some(thread) = &self.thread {
            thread.thread().unpark();
        }
    }

    /// True once the coordinator said the lease is no longer ours.
    pub fn lease_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                warn!("reporter thread panicked");
            }
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report_loop(
    link: &dyn CoordinatorLink,
    worker: &WorkerId,
    exponent: Exponent,
    slot: &ArrayQueue<ProgressReport>,
    stop: &AtomicBool,
    lost: &AtomicBool,
) {
    while !stop.load(Ordering::SeqCst) {
        let Some(report) = slot.pop() else {
            thread::park_timeout(IDLE_PARK);
            continue;
        };

        let percent = report.progress.as_percent();
        match link.report_progress(worker, exponent, percent) {
            Ok(expires_at) => {
                debug!(%exponent, percent, eta = ?report.eta, expires_at = expires_at.as_secs(), "lease renewed");
            }
            Err(e) if e.class() == ErrorClass::Contention => {
                warn!(%exponent, error = %e, "lease lost");
                lost.store(true, Ordering::SeqCst);
                return;
            }
            // A missed heartbeat is harmless while the lease has time left
            Err(e) => warn!(%exponent, error = %e, "progress report failed"),
        }
    }
}
