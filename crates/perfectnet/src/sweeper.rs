//! Background lease expiry.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::Coordinator;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Calls [`Coordinator::sweep_expired`] every `interval` on its own thread.
///
/// Sweeps share the coordinator's writer lock, so they never interleave
/// with assignments. Dropping the handle stops the thread.
#[derive(Debug)]
pub struct ExpirySweeper {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn spawn(coordinator: Coordinator, interval: Duration) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("expiry-sweeper".into())
            .spawn(move || run(&coordinator, interval, &thread_signal))?;
        info!(interval_ms = interval.as_millis() as u64, "expiry sweeper started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Ok(mut stopped) = self.signal.stopped.lock() {
            *stopped = true;
        }
        self.signal.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("expiry sweeper panicked");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(coordinator: &Coordinator, interval: Duration, signal: &StopSignal) {
    let Ok(mut stopped) = signal.stopped.lock() else {
        return;
    };
    loop {
        let Ok((guard, _)) = signal.wake.wait_timeout(stopped, interval) else {
            return;
        };
        stopped = guard;
        if *stopped {
            debug!("expiry sweeper stopping");
            return;
        }

        match coordinator.sweep_expired() {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                info!(count = reclaimed.len(), "reclaimed expired leases");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "expiry sweep failed"),
        }
    }
}
