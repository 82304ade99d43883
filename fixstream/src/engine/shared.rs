//! State shared between the engine handle and its worker thread.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::gate::WorkerSignals;
use super::interpreter::Interpreter;
use super::lifecycle::{EngineState, SyncRoot};
use super::notify::{Notification, Notifier};
use super::reconnect::ReconnectCounter;
use super::recording::Recorder;
use crate::config::EngineConfig;
use crate::device::{Device, DeviceLocator};
use crate::filter::PrecisionFilter;
use crate::model::DecodedState;

pub(crate) struct Shared {
    pub(crate) state: RwLock<EngineState>,
    pub(crate) sync_root: SyncRoot,
    pub(crate) config: RwLock<EngineConfig>,
    pub(crate) model: RwLock<DecodedState>,

    pub(crate) device: Mutex<Option<Box<dyn Device>>>,
    pub(crate) device_name: RwLock<Option<String>>,
    /// Whether the current device came from the locator (and so should be
    /// located afresh when reconnecting).
    pub(crate) located: AtomicBool,
    pub(crate) locator: Mutex<Option<Box<dyn DeviceLocator>>>,

    pub(crate) interpreter: Mutex<Box<dyn Interpreter>>,
    pub(crate) filter: Mutex<Box<dyn PrecisionFilter>>,

    /// Recording sink, under its own lock.
    pub(crate) recorder: Mutex<Option<Recorder>>,
    pub(crate) notifier: Notifier,
    pub(crate) reconnect: ReconnectCounter,
}

impl Shared {
    pub(crate) fn new(
        interpreter: Box<dyn Interpreter>,
        locator: Option<Box<dyn DeviceLocator>>,
        filter: Box<dyn PrecisionFilter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            state: RwLock::new(EngineState::Stopped),
            sync_root: SyncRoot::default(),
            notifier: Notifier::new(config.notification_capacity()),
            config: RwLock::new(config),
            model: RwLock::new(DecodedState::new()),
            device: Mutex::new(None),
            device_name: RwLock::new(None),
            located: AtomicBool::new(false),
            locator: Mutex::new(locator),
            interpreter: Mutex::new(interpreter),
            filter: Mutex::new(filter),
            recorder: Mutex::new(None),
            reconnect: ReconnectCounter::default(),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Set the state. `Disposed` is terminal.
    pub(crate) fn set_state(&self, to: EngineState) {
        let mut state = self.state.write();
        if *state != EngineState::Disposed {
            *state = to;
        }
    }

    /// Transition requested by a worker. Ignored once the worker has been
    /// cancelled, so an abandoned or stopping worker never overwrites the
    /// command's state. A paused engine stays paused.
    pub(crate) fn worker_transition(&self, signals: &WorkerSignals, to: EngineState) -> bool {
        let mut state = self.state.write();
        if signals.is_cancelled() {
            return false;
        }
        if !matches!(*state, EngineState::Paused | EngineState::Disposed) {
            *state = to;
        }
        true
    }

    /// A worker giving up leaves the engine stopped, paused or not.
    pub(crate) fn worker_settle(&self, signals: &WorkerSignals) {
        let mut state = self.state.write();
        if !signals.is_cancelled() && *state != EngineState::Disposed {
            *state = EngineState::Stopped;
        }
    }

    pub(crate) fn emit(&self, notification: Notification) {
        self.notifier.emit(notification);
    }

    pub(crate) fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Return the model and filter to their initial state.
    pub(crate) fn reinitialize(&self) {
        self.model.write().reset();
        self.filter.lock().reset();
    }

    /// Close the device, waiting at most `timeout` for a worker stuck in a
    /// read to let go of it.
    pub(crate) fn close_device(&self, timeout: Duration) -> bool {
        match self.device.try_lock_for(timeout) {
            Some(mut slot) => {
                if let Some(device) = slot.as_mut() {
                    device.close();
                    debug!(device = %device.name(), "Device closed");
                }
                true
            }
            None => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Device still held by worker, leaving it open"
                );
                false
            }
        }
    }

    /// Stop recording, flushing the sink. Returns the bytes recorded.
    pub(crate) fn finish_recording(&self) -> Option<u64> {
        let recorder = self.recorder.lock().take()?;
        match recorder.finish() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to flush recording");
                None
            }
        }
    }
}
