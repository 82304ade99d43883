//! Lifecycle states and the command lock.
//!
//! # State Machine
//!
//! ```text
//! Stopped --start--> Starting --> Running --pause--> Paused
//!                                 Running <--resume- Paused
//! Running/Paused --stop--> Stopping --> Stopped
//! any --dispose--> Disposed (terminal)
//! ```
//!
//! The worker drives `Running -> Stopping -> Stopped -> Starting -> Running`
//! on its own while reconnecting.

use std::fmt;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use super::error::EngineError;

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Disposed,
}

impl EngineState {
    /// Whether a worker is (or should be) reading.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Running | EngineState::Paused
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Stopping => "stopping",
            EngineState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Lifecycle commands, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Pause,
    Resume,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Pause => "pause",
            Command::Resume => "resume",
        };
        f.write_str(name)
    }
}

/// Timed lock serializing lifecycle commands.
#[derive(Debug, Default)]
pub(crate) struct SyncRoot(Mutex<()>);

impl SyncRoot {
    /// Acquire the lock for `command`, giving up after `timeout`.
    pub(crate) fn acquire(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, ()>, EngineError> {
        self.0
            .try_lock_for(timeout)
            .ok_or(EngineError::Busy { command, timeout })
    }
}
