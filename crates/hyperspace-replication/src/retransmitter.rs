//! The retransmitter background thread.
//!
//! Reconfiguration is the engine's only cancellation signal: sends in
//! flight under an old epoch are simply dropped. On each wake the
//! retransmitter walks the key-state table and re-emits committable
//! operations whose downstream send predates the current epoch,
//! collects garbage key-states along the way, closes identifier-space
//! gaps, and re-checks checkpoint stability. Receivers are idempotent
//! by `(region, version)`, so duplicates are harmless.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::manager::ReplicationManager;

/// Default pause between repair passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

struct Shared {
    stop: Mutex<StopState>,
    wake: Condvar,
}

struct StopState {
    shutdown: bool,
    kicked: bool,
}

/// Handle to the background thread. Dropping the handle without calling
/// [`Retransmitter::shutdown`] detaches the thread.
pub struct Retransmitter {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Retransmitter {
    /// Spawns the repair thread.
    pub fn spawn(manager: Arc<ReplicationManager>, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            stop: Mutex::new(StopState {
                shutdown: false,
                kicked: false,
            }),
            wake: Condvar::new(),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("retransmitter".to_string())
            .spawn(move || run(&manager, &thread_shared, interval))
            .expect("failed to spawn retransmitter");

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Requests an immediate pass (e.g. right after reconfiguration).
    pub fn kick(&self) {
        let mut stop = self.shared.stop.lock().expect("retransmitter poisoned");
        stop.kicked = true;
        drop(stop);
        self.shared.wake.notify_one();
    }

    /// Stops the thread and waits for it to exit.
    pub fn shutdown(mut self) {
        let mut stop = self.shared.stop.lock().expect("retransmitter poisoned");
        stop.shutdown = true;
        drop(stop);
        self.shared.wake.notify_one();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(manager: &ReplicationManager, shared: &Shared, interval: Duration) {
    tracing::debug!("retransmitter running");

    loop {
        let mut stop = shared.stop.lock().expect("retransmitter poisoned");

        while !stop.shutdown && !stop.kicked {
            let (guard, timeout) = shared
                .wake
                .wait_timeout(stop, interval)
                .expect("retransmitter poisoned");
            stop = guard;

            if timeout.timed_out() {
                break;
            }
        }

        if stop.shutdown {
            break;
        }

        stop.kicked = false;
        drop(stop);

        manager.retransmit_cycle();
    }

    tracing::debug!("retransmitter exiting");
}
