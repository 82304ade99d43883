//! Engine error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use super::lifecycle::Command;
use crate::config::ConfigError;
use crate::device::DeviceError;

/// Errors returned synchronously by engine commands.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The command lock could not be acquired in time.
    #[error("{command} command timed out after {timeout:?} waiting for the engine")]
    Busy { command: Command, timeout: Duration },

    /// The engine was disposed; it accepts no further commands.
    #[error("engine has been disposed")]
    Disposed,

    /// Start was requested without a device and none could be located.
    #[error("no device available")]
    NoDevice,

    /// A configuration update was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The worker or a dispatch thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Result alias for engine commands.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised while reading or decoding one packet.
///
/// Only transport failures engage the reconnection policy; everything
/// else is reported as an exception and the read loop continues.
#[derive(Debug, Error)]
pub enum PacketError {
    /// The device failed underneath the interpreter.
    #[error("device failure: {0}")]
    Device(#[from] DeviceError),

    /// The packet could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),
}

impl PacketError {
    pub fn decode(message: impl Into<String>) -> Self {
        PacketError::Decode(message.into())
    }

    /// Whether this failure should engage the reconnection policy.
    pub fn is_transport(&self) -> bool {
        match self {
            PacketError::Device(e) => e.is_transport(),
            PacketError::Decode(_) => false,
        }
    }
}

impl From<io::Error> for PacketError {
    fn from(err: io::Error) -> Self {
        PacketError::Device(DeviceError::Io(err))
    }
}
