//! Supervised acquisition engine.
//!
//! An [`Engine`] owns one background worker that reads packets from a
//! [`Device`] through a pluggable [`Interpreter`], passes every decoded
//! value through the precision gate in [`PacketContext`], and publishes
//! [`Notification`]s. Commands ([`start`](Engine::start),
//! [`stop`](Engine::stop), [`pause`](Engine::pause),
//! [`resume`](Engine::resume)) run on the caller's thread and serialize on
//! a timed command lock; none of them blocks longer than the configured
//! command timeout waiting for it.
//!
//! # Example
//!
//! ```no_run
//! use fixstream::device::FileDevice;
//! use fixstream::engine::{Engine, Interpreter, Notification, PacketContext, PacketError};
//! use fixstream::device::Device;
//!
//! struct Raw;
//!
//! impl Interpreter for Raw {
//!     fn read_packet(
//!         &mut self,
//!         device: &mut dyn Device,
//!         ctx: &mut PacketContext<'_>,
//!     ) -> Result<(), PacketError> {
//!         let mut buf = [0u8; 512];
//!         let n = device.read(&mut buf)?;
//!         ctx.record(&buf[..n]);
//!         Ok(())
//!     }
//! }
//!
//! let engine = Engine::new(Raw);
//! let mut events = engine.subscribe()?;
//! engine.start_with(Box::new(FileDevice::new("/dev/ttyUSB0")))?;
//! while let Ok(event) = events.blocking_recv() {
//!     if let Notification::ConnectionLost(cause) = event {
//!         eprintln!("lost: {cause}");
//!     }
//! }
//! # Ok::<(), fixstream::engine::EngineError>(())
//! ```

mod context;
mod error;
mod gate;
mod interpreter;
mod lifecycle;
mod notify;
mod reconnect;
mod recording;
mod shared;
mod worker;

pub use context::PacketContext;
pub use error::{EngineError, EngineResult, PacketError};
pub use interpreter::Interpreter;
pub use lifecycle::{Command, EngineState};
pub use notify::{Measurement, Notification};
pub use recording::Recorder;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::device::{Device, DeviceLocator};
use crate::filter::{KalmanFilter, PrecisionFilter};
use crate::model::DecodedState;
use crate::units::Position;
use gate::WorkerSignals;
use shared::Shared;

/// Builder for an [`Engine`].
pub struct EngineBuilder {
    interpreter: Box<dyn Interpreter>,
    locator: Option<Box<dyn DeviceLocator>>,
    filter: Box<dyn PrecisionFilter>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new(interpreter: impl Interpreter + 'static) -> Self {
        Self {
            interpreter: Box::new(interpreter),
            locator: None,
            filter: Box::new(KalmanFilter::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where to find a device when started without one.
    pub fn locator(mut self, locator: impl DeviceLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Replace the default [`KalmanFilter`].
    pub fn filter(mut self, filter: impl PrecisionFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            shared: Arc::new(Shared::new(
                self.interpreter,
                self.locator,
                self.filter,
                self.config,
            )),
            worker: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }
}

struct WorkerHandle {
    thread: JoinHandle<()>,
    signals: Arc<WorkerSignals>,
}

/// A supervised positioning acquisition engine.
///
/// Dropping the engine disposes it.
pub struct Engine {
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
    disposed: AtomicBool,
}

impl Engine {
    /// An engine with default configuration, no locator and the default
    /// filter.
    pub fn new(interpreter: impl Interpreter + 'static) -> Self {
        EngineBuilder::new(interpreter).build()
    }

    pub fn builder(interpreter: impl Interpreter + 'static) -> EngineBuilder {
        EngineBuilder::new(interpreter)
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// A clone of the decoded state.
    pub fn snapshot(&self) -> DecodedState {
        self.shared.model.read().clone()
    }

    /// Whether position, speed and bearing currently meet the configured
    /// fix and precision requirements.
    pub fn is_fix_usable(&self) -> bool {
        let config = self.shared.config.read();
        self.shared.model.read().is_fix_usable(&config)
    }

    /// Name of the most recently opened device.
    pub fn device_name(&self) -> Option<String> {
        self.shared.device_name.read().clone()
    }

    /// Consecutive reconnection attempts since the last successful open.
    pub fn reconnection_attempts(&self) -> u32 {
        self.shared.reconnect.consecutive()
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.config()
    }

    /// Apply a validated change to the configuration. The change is made on
    /// a copy and only stored if every setter succeeds.
    ///
    /// The notification capacity is fixed when the engine is built; later
    /// changes to it have no effect on this engine.
    pub fn update_config<F>(&self, update: F) -> EngineResult<()>
    where
        F: FnOnce(&mut EngineConfig) -> Result<(), ConfigError>,
    {
        self.ensure_alive()?;
        let mut config = self.shared.config.write();
        let mut candidate = config.clone();
        update(&mut candidate)?;
        *config = candidate;
        Ok(())
    }

    /// Subscribe to the ordered notification stream.
    pub fn subscribe(&self) -> EngineResult<broadcast::Receiver<Notification>> {
        self.shared.notifier.subscribe().ok_or(EngineError::Disposed)
    }

    /// Subscribe to the latest-position slot.
    pub fn watch_position(&self) -> EngineResult<watch::Receiver<Option<Position>>> {
        self.shared
            .notifier
            .watch_position()
            .ok_or(EngineError::Disposed)
    }

    /// Run `handler` on a dedicated thread for each position change. A slow
    /// handler skips intermediate positions and only ever sees the latest.
    /// The thread ends when the engine is disposed.
    pub fn on_position<F>(&self, mut handler: F) -> EngineResult<JoinHandle<()>>
    where
        F: FnMut(Position) + Send + 'static,
    {
        let mut rx = self.watch_position()?;
        thread::Builder::new()
            .name("fixstream-position".to_string())
            .spawn(move || {
                while futures::executor::block_on(rx.changed()).is_ok() {
                    let latest = *rx.borrow_and_update();
                    if let Some(position) = latest {
                        handler(position);
                    }
                }
            })
            .map_err(|source| EngineError::Spawn {
                name: "position dispatch",
                source,
            })
    }

    /// Identity of the current worker thread, if one is running.
    pub fn worker_thread(&self) -> Option<ThreadId> {
        self.worker
            .lock()
            .as_ref()
            .filter(|w| !w.signals.has_exited())
            .map(|w| w.thread.thread().id())
    }

    /// Start reading from the configured device, or one from the locator.
    pub fn start(&self) -> EngineResult<()> {
        self.start_inner(None)
    }

    /// Start reading from `device`, replacing any previous device.
    pub fn start_with(&self, device: Box<dyn Device>) -> EngineResult<()> {
        self.start_inner(Some(device))
    }

    fn start_inner(&self, device: Option<Box<dyn Device>>) -> EngineResult<()> {
        self.ensure_alive()?;
        let timeout = self.command_timeout();
        let deadline = Instant::now() + timeout;
        let _guard = self.shared.sync_root.acquire(Command::Start, timeout)?;
        self.ensure_alive()?;

        match self.shared.state() {
            EngineState::Running | EngineState::Starting => return Ok(()),
            EngineState::Paused => {
                self.restart_paused();
                return Ok(());
            }
            _ => {}
        }

        // A worker may still be alive between reconnection attempts
        self.cancel_worker(None);
        self.join_worker(remaining(deadline));
        self.install_device(device, deadline, timeout)?;

        info!("Starting engine");
        self.shared.set_state(EngineState::Starting);
        self.shared.emit(Notification::Starting);

        let signals = Arc::new(WorkerSignals::paused());
        let thread = worker::spawn(Arc::clone(&self.shared), Arc::clone(&signals)).map_err(
            |source| {
                self.shared.set_state(EngineState::Stopped);
                EngineError::Spawn {
                    name: "worker",
                    source,
                }
            },
        )?;

        if !signals.wait_live(remaining(deadline)) {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Worker did not report live in time"
            );
        }
        *self.worker.lock() = Some(WorkerHandle {
            thread,
            signals: Arc::clone(&signals),
        });

        if self.disposed.load(Ordering::SeqCst) {
            signals.cancel();
            return Err(EngineError::Disposed);
        }

        self.shared.set_state(EngineState::Running);
        self.shared.emit(Notification::Started);
        signals.resume();
        info!("Engine started");
        Ok(())
    }

    fn restart_paused(&self) {
        info!("Starting paused engine");
        self.shared.set_state(EngineState::Starting);
        self.shared.emit(Notification::Starting);
        self.shared.set_state(EngineState::Running);
        self.shared.emit(Notification::Started);
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.signals.resume();
        }
    }

    fn install_device(
        &self,
        device: Option<Box<dyn Device>>,
        deadline: Instant,
        timeout: Duration,
    ) -> EngineResult<()> {
        let mut slot = self
            .shared
            .device
            .try_lock_for(remaining(deadline))
            .ok_or(EngineError::Busy {
                command: Command::Start,
                timeout,
            })?;

        match device {
            Some(device) => {
                debug!(device = %device.name(), "Using supplied device");
                if let Some(mut previous) = slot.replace(device) {
                    previous.close();
                }
                self.shared.located.store(false, Ordering::SeqCst);
            }
            None if slot.is_some() => {}
            None => {
                let found = self
                    .shared
                    .locator
                    .lock()
                    .as_mut()
                    .and_then(|locator| locator.locate());
                let Some(device) = found else {
                    warn!("No device available");
                    return Err(EngineError::NoDevice);
                };
                debug!(device = %device.name(), "Located device");
                *slot = Some(device);
                self.shared.located.store(true, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    /// Stop the worker and close the device.
    ///
    /// Returns within about the command timeout. A worker stuck in a device
    /// read is abandoned rather than awaited: it is reported with
    /// [`Notification::WorkerAbandoned`] and keeps the device open until its
    /// read returns.
    pub fn stop(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let timeout = self.command_timeout();
        let deadline = Instant::now() + timeout;
        let _guard = self.shared.sync_root.acquire(Command::Stop, timeout)?;
        self.ensure_alive()?;

        if self.shared.state() == EngineState::Stopped {
            // The worker may have given up, or be sleeping between attempts
            self.cancel_worker(None);
            self.join_worker(remaining(deadline));
            return Ok(());
        }

        info!("Stopping engine");
        self.cancel_worker(Some(EngineState::Stopping));
        self.shared.emit(Notification::Stopping);

        if self.join_worker(remaining(deadline)) {
            self.shared.close_device(remaining(deadline));
        }

        self.shared.set_state(EngineState::Stopped);
        self.shared.emit(Notification::Stopped);
        info!("Engine stopped");
        Ok(())
    }

    /// Hold the worker at the pause gate. The device stays open.
    pub fn pause(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let timeout = self.command_timeout();
        let _guard = self.shared.sync_root.acquire(Command::Pause, timeout)?;
        self.ensure_alive()?;

        if self.shared.state() != EngineState::Running {
            return Ok(());
        }

        if let Some(worker) = self.worker.lock().as_ref() {
            worker.signals.pause();
        }
        self.shared.set_state(EngineState::Paused);
        self.shared.emit(Notification::Paused);
        info!("Engine paused");
        Ok(())
    }

    /// Release the pause gate.
    pub fn resume(&self) -> EngineResult<()> {
        self.ensure_alive()?;
        let timeout = self.command_timeout();
        let _guard = self.shared.sync_root.acquire(Command::Resume, timeout)?;
        self.ensure_alive()?;

        if self.shared.state() != EngineState::Paused {
            return Ok(());
        }

        self.shared.set_state(EngineState::Running);
        self.shared.emit(Notification::Resumed);
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.signals.resume();
        }
        info!("Engine resumed");
        Ok(())
    }

    /// Tear the engine down. Idempotent; takes effect even while another
    /// command is in flight.
    ///
    /// Bounded by the command timeout as a whole. A device still held by an
    /// abandoned worker is left to that worker.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Disposing engine");
        let timeout = self.command_timeout();
        let deadline = Instant::now() + timeout;

        // Give an in-flight command a chance to finish, but never wait on it
        // past the deadline.
        let _guard = self
            .shared
            .sync_root
            .acquire(Command::Stop, timeout)
            .ok();

        self.cancel_worker(Some(EngineState::Disposed));
        if self.join_worker(remaining(deadline)) && self.shared.close_device(remaining(deadline))
        {
            self.shared.device.lock().take();
        }

        self.shared.reinitialize();
        if let Some(bytes) = self.shared.finish_recording() {
            debug!(bytes, "Recording finished on dispose");
        }
        self.shared.notifier.close();
        info!("Engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Record raw packets to `sink` until [`stop_recording`](Self::stop_recording).
    /// Replaces (and flushes) any recording in progress.
    pub fn start_recording(&self, sink: impl Write + Send + 'static) -> EngineResult<()> {
        self.ensure_alive()?;
        let previous = self.shared.recorder.lock().replace(Recorder::new(sink));
        if let Some(previous) = previous {
            if let Err(e) = previous.finish() {
                warn!(error = %e, "Failed to flush previous recording");
            }
        }
        info!("Recording started");
        Ok(())
    }

    /// Stop recording. Returns the number of bytes recorded, or `None` if
    /// nothing was being recorded.
    pub fn stop_recording(&self) -> Option<u64> {
        let bytes = self.shared.finish_recording();
        if let Some(bytes) = bytes {
            info!(bytes, "Recording stopped");
        }
        bytes
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recorder.lock().is_some()
    }

    fn ensure_alive(&self) -> EngineResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }

    fn command_timeout(&self) -> Duration {
        self.shared.config.read().command_timeout()
    }

    /// Cancel the current worker, optionally moving to `state` atomically
    /// with the cancellation so the worker cannot overwrite it.
    fn cancel_worker(&self, state: Option<EngineState>) {
        let mut current = self.shared.state.write();
        if let Some(state) = state {
            if *current != EngineState::Disposed {
                *current = state;
            }
        }
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.signals.cancel();
        }
    }

    /// Join the worker, abandoning it if it does not exit within `timeout`.
    /// Returns false if a worker was abandoned.
    fn join_worker(&self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        if worker.signals.wait_exited(timeout) {
            if worker.thread.join().is_err() {
                error!("Worker thread panicked");
            }
            return true;
        }

        let device = self.shared.device_name.read().clone();
        warn!(
            thread = ?worker.thread.thread().id(),
            device = device.as_deref().unwrap_or("none"),
            timeout_ms = timeout.as_millis() as u64,
            "Worker did not exit in time, abandoning it with the device open"
        );
        self.shared.emit(Notification::WorkerAbandoned { device });
        false
    }
}

/// Time left until `deadline`, zero once it has passed.
fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::broadcast::error::TryRecvError;

    /// Device that yields an endless stream of empty reads.
    struct Steady {
        open: bool,
        opens: Arc<AtomicUsize>,
    }

    impl Steady {
        fn new() -> (Self, Arc<AtomicUsize>) {
            let opens = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    open: false,
                    opens: Arc::clone(&opens),
                },
                opens,
            )
        }
    }

    impl Device for Steady {
        fn name(&self) -> &str {
            "steady"
        }

        fn open(&mut self, _read_timeout: Duration) -> Result<(), DeviceError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn read(&mut self, _buf: &mut [u8]) -> Result<usize, DeviceError> {
            if !self.open {
                return Err(DeviceError::NotOpen("steady".into()));
            }
            thread::sleep(Duration::from_millis(2));
            Ok(1)
        }
    }

    struct Bytes;

    impl Interpreter for Bytes {
        fn read_packet(
            &mut self,
            device: &mut dyn Device,
            ctx: &mut PacketContext<'_>,
        ) -> Result<(), PacketError> {
            let mut buf = [0u8; 16];
            let n = device.read(&mut buf)?;
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            ctx.record(&buf[..n]);
            Ok(())
        }
    }

    fn quick_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.set_command_timeout(Duration::from_secs(1)).unwrap();
        config
    }

    fn engine() -> Engine {
        Engine::builder(Bytes).config(quick_config()).build()
    }

    fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }

    #[test]
    fn test_start_without_device_or_locator_fails() {
        let engine = engine();
        assert!(matches!(engine.start(), Err(EngineError::NoDevice)));
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_start_uses_locator() {
        let engine = Engine::builder(Bytes)
            .config(quick_config())
            .locator(|| -> Option<Box<dyn Device>> { Some(Box::new(Steady::new().0)) })
            .build();

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn test_start_fires_starting_then_started() {
        let engine = engine();
        let mut rx = engine.subscribe().unwrap();
        let (device, opens) = Steady::new();

        engine.start_with(Box::new(device)).unwrap();
        let events = drain(&mut rx);
        assert!(matches!(events[0], Notification::Starting));
        assert!(matches!(events[1], Notification::Started));

        // Starting a running engine is a no-op
        engine.start().unwrap();
        assert!(drain(&mut rx)
            .iter()
            .all(|e| !matches!(e, Notification::Starting)));

        engine.stop().unwrap();
        assert!(opens.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_stop_on_stopped_engine_is_silent() {
        let engine = engine();
        let mut rx = engine.subscribe().unwrap();

        engine.stop().unwrap();
        engine.stop().unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_pause_and_resume_are_noops_when_not_applicable() {
        let engine = engine();
        let mut rx = engine.subscribe().unwrap();

        engine.pause().unwrap();
        engine.resume().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_start_on_paused_engine_resumes_same_worker() {
        let engine = engine();
        engine.start_with(Box::new(Steady::new().0)).unwrap();
        let worker = engine.worker_thread();

        engine.pause().unwrap();
        assert_eq!(engine.state(), EngineState::Paused);
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.worker_thread(), worker);

        engine.stop().unwrap();
    }

    #[test]
    fn test_busy_when_command_lock_held() {
        let engine = engine();
        let _held = engine
            .shared
            .sync_root
            .acquire(Command::Start, Duration::from_secs(1))
            .unwrap();

        let started = std::time::Instant::now();
        let result = engine.pause();
        assert!(matches!(
            result,
            Err(EngineError::Busy {
                command: Command::Pause,
                ..
            })
        ));
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_dispose_is_idempotent_and_terminal() {
        let engine = engine();
        engine.start_with(Box::new(Steady::new().0)).unwrap();
        let mut rx = engine.subscribe().unwrap();

        engine.dispose();
        engine.dispose();
        assert!(engine.is_disposed());
        assert_eq!(engine.state(), EngineState::Disposed);
        assert!(engine.worker_thread().is_none());

        assert!(matches!(engine.start(), Err(EngineError::Disposed)));
        assert!(matches!(engine.stop(), Err(EngineError::Disposed)));
        assert!(matches!(engine.subscribe(), Err(EngineError::Disposed)));

        // Subscription is closed after any buffered events
        loop {
            match rx.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(e) => {
                    assert_eq!(e, TryRecvError::Closed);
                    break;
                }
            }
        }
    }

    #[test]
    fn test_update_config_is_atomic() {
        let engine = engine();
        let result = engine.update_config(|c| {
            c.set_max_horizontal_dop(10.0)?;
            c.set_max_vertical_dop(0.0)
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
        assert_eq!(engine.config().max_horizontal_dop(), 50.0);

        engine
            .update_config(|c| c.set_max_horizontal_dop(10.0))
            .unwrap();
        assert_eq!(engine.config().max_horizontal_dop(), 10.0);
    }

    #[test]
    fn test_recording_captures_packets() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("raw.bin");
        let engine = engine();

        engine
            .start_recording(std::fs::File::create(&path).unwrap())
            .unwrap();
        assert!(engine.is_recording());
        engine.start_with(Box::new(Steady::new().0)).unwrap();
        thread::sleep(Duration::from_millis(50));
        engine.stop().unwrap();

        let bytes = engine.stop_recording().unwrap();
        assert!(bytes > 0);
        assert!(!engine.is_recording());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes);
    }
}
