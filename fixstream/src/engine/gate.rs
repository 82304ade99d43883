//! Worker signals: the pause gate, cancellation and liveness handshake.
//!
//! Every worker thread gets its own `WorkerSignals`. Cancelling releases the
//! gate and interrupts backoff sleeps, so a worker parked anywhere other
//! than inside a device read notices promptly. An abandoned worker keeps
//! its cancelled signals, which is what stops it publishing stale data
//! once its read finally returns.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Flags {
    paused: bool,
    cancelled: bool,
    live: bool,
    exited: bool,
}

#[derive(Debug, Default)]
pub(crate) struct WorkerSignals {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl WorkerSignals {
    /// Signals with the gate closed. The worker parks until `resume`.
    pub(crate) fn paused() -> Self {
        let signals = Self::default();
        signals.flags.lock().paused = true;
        signals
    }

    pub(crate) fn pause(&self) {
        self.flags.lock().paused = true;
    }

    pub(crate) fn resume(&self) {
        self.flags.lock().paused = false;
        self.cond.notify_all();
    }

    pub(crate) fn cancel(&self) {
        self.flags.lock().cancelled = true;
        self.cond.notify_all();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.flags.lock().cancelled
    }

    /// Block while the gate is closed. Returns false once cancelled.
    pub(crate) fn wait_while_paused(&self) -> bool {
        let mut flags = self.flags.lock();
        while flags.paused && !flags.cancelled {
            self.cond.wait(&mut flags);
        }
        !flags.cancelled
    }

    /// Sleep for `duration` unless cancelled first. Returns false if
    /// cancelled.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut flags = self.flags.lock();
        while !flags.cancelled {
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        !flags.cancelled
    }

    pub(crate) fn mark_live(&self) {
        self.flags.lock().live = true;
        self.cond.notify_all();
    }

    /// Wait for the worker to report it is running. False on timeout or if
    /// it exited first.
    pub(crate) fn wait_live(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !flags.live && !flags.exited {
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        flags.live && !flags.exited
    }

    pub(crate) fn mark_exited(&self) {
        self.flags.lock().exited = true;
        self.cond.notify_all();
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.flags.lock().exited
    }

    /// Wait for the worker loop to return. False on timeout.
    pub(crate) fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !flags.exited {
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                break;
            }
        }
        flags.exited
    }
}
