//! The acquisition worker.
//!
//! One thread per engine run. It parks on the pause gate until the start
//! command has published `Started`, then loops:
//!
//! ```text
//! open device --fail--> recover --retry--> open device
//!     |ok                  |give up
//! read packets             exit (engine settles in Stopped)
//!     |transport failure
//! recover
//! ```
//!
//! Cancellation (stop, dispose, or a restart) is checked at the gate, in
//! the backoff sleep and after every failed read.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::context::PacketContext;
use super::error::PacketError;
use super::gate::WorkerSignals;
use super::lifecycle::EngineState;
use super::notify::Notification;
use super::reconnect::ReconnectDecision;
use super::shared::Shared;
use crate::device::DeviceError;

pub(crate) fn spawn(
    shared: Arc<Shared>,
    signals: Arc<WorkerSignals>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("fixstream-worker".to_string())
        .spawn(move || Worker { shared, signals }.run())
}

/// Marks the worker exited even if the interpreter panics.
struct ExitGuard(Arc<WorkerSignals>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.mark_exited();
    }
}

struct Worker {
    shared: Arc<Shared>,
    signals: Arc<WorkerSignals>,
}

impl Worker {
    fn run(self) {
        let _exit = ExitGuard(Arc::clone(&self.signals));
        self.signals.mark_live();
        debug!("Worker started");

        let mut reconnecting = false;
        loop {
            if !self.signals.wait_while_paused() {
                break;
            }

            if let Err(err) = self.connect(reconnecting) {
                if self.recover(err) {
                    reconnecting = true;
                    continue;
                }
                break;
            }
            reconnecting = false;

            match self.read_until_failure() {
                Some(err) => {
                    if !self.recover(err) {
                        break;
                    }
                    reconnecting = true;
                }
                None => break,
            }
        }

        debug!(cancelled = self.signals.is_cancelled(), "Worker exiting");
    }

    /// Acquire and open the device, then re-initialize for it.
    fn connect(&self, reconnecting: bool) -> Result<(), PacketError> {
        let read_timeout = self.shared.config.read().read_timeout();

        let name = {
            let mut interpreter = self.shared.interpreter.lock();
            let mut slot = self.shared.device.lock();

            if reconnecting && self.shared.located.load(Ordering::SeqCst) {
                if let Some(found) = self.shared.locator.lock().as_mut().and_then(|l| l.locate())
                {
                    debug!(device = %found.name(), "Located replacement device");
                    *slot = Some(found);
                }
            }

            let device = slot.as_mut().ok_or(DeviceError::NotFound)?;
            device.open(read_timeout)?;
            interpreter.on_device_changed(&**device);
            device.name().to_string()
        };

        if self.signals.is_cancelled() {
            return Ok(());
        }

        self.shared.reconnect.reset();
        let changed = {
            let mut current = self.shared.device_name.write();
            let changed = current.as_deref() != Some(name.as_str());
            *current = Some(name.clone());
            changed
        };
        if changed {
            self.shared.reinitialize();
        }
        info!(device = %name, reconnected = reconnecting, "Device opened");

        if reconnecting && self.shared.worker_transition(&self.signals, EngineState::Running) {
            self.shared.emit(Notification::Started);
        }
        self.shared.emit(Notification::DeviceChanged { name });
        Ok(())
    }

    /// Read packets until a transport failure (returned) or cancellation
    /// (`None`). Other failures are reported and skipped.
    fn read_until_failure(&self) -> Option<PacketError> {
        loop {
            if !self.signals.wait_while_paused() {
                return None;
            }

            let result = {
                let mut interpreter = self.shared.interpreter.lock();
                let mut slot = self.shared.device.lock();
                match slot.as_deref_mut() {
                    Some(device) => {
                        let mut ctx = PacketContext::new(&self.shared, &self.signals);
                        interpreter.read_packet(device, &mut ctx)
                    }
                    None => Err(PacketError::Device(DeviceError::NotFound)),
                }
            };

            match result {
                Ok(()) => {}
                Err(_) if self.signals.is_cancelled() => return None,
                Err(err) if err.is_transport() => return Some(err),
                Err(err) => {
                    debug!(error = %err, "Packet failed");
                    self.shared
                        .emit(Notification::ExceptionOccurred(Arc::new(err)));
                }
            }
        }
    }

    /// Report a transport failure and apply the reconnection policy.
    /// Returns true if the worker should try to connect again.
    fn recover(&self, err: PacketError) -> bool {
        if self.signals.is_cancelled() {
            return false;
        }

        warn!(
            error = %err,
            consecutive_attempts = self.shared.reconnect.consecutive(),
            "Connection lost"
        );
        self.shared
            .emit(Notification::ConnectionLost(Arc::new(err)));

        if self
            .shared
            .worker_transition(&self.signals, EngineState::Stopping)
        {
            self.shared.emit(Notification::Stopping);
        }
        if let Some(device) = self.shared.device.lock().as_mut() {
            device.reset();
        }
        if self
            .shared
            .worker_transition(&self.signals, EngineState::Stopped)
        {
            self.shared.emit(Notification::Stopped);
        }

        let decision = self.shared.reconnect.decide(&self.shared.config());
        match decision {
            ReconnectDecision::GiveUp => {
                info!("Reconnection not permitted, worker stopping");
                self.shared.worker_settle(&self.signals);
                false
            }
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting"
                );
                if !self.signals.sleep(delay) {
                    return false;
                }
                self.shared.reconnect.record_attempt();
                if self
                    .shared
                    .worker_transition(&self.signals, EngineState::Starting)
                {
                    self.shared.emit(Notification::Starting);
                    true
                } else {
                    false
                }
            }
        }
    }
}
