//! Device abstraction.
//!
//! The engine treats a device purely as an openable, closable, resettable
//! byte source. Interpreters read raw bytes through [`Device::read`];
//! nothing here knows about sentence grammars.
//!
//! # Implementors
//!
//! - [`FileDevice`] - a file, FIFO, or character device path
//! - [`TcpDevice`] - a raw positioning stream served over TCP
//!
//! # Locating devices
//!
//! [`DeviceLocator`] supplies a device when the engine is started without
//! one, and again whenever a reconnection finds no device. Any
//! `FnMut() -> Option<Box<dyn Device>>` closure is a locator.

mod file;
mod tcp;

use std::io;
use std::time::Duration;

use thiserror::Error;

pub use file::FileDevice;
pub use tcp::TcpDevice;

/// Errors raised by devices.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Underlying I/O failure.
    #[error("device I/O error: {0}")]
    Io(#[from] io::Error),

    /// The process may not access the device.
    #[error("permission denied for device {0}")]
    PermissionDenied(String),

    /// No usable device could be found.
    #[error("no device available")]
    NotFound,

    /// A read was attempted on a closed device.
    #[error("device {0} is not open")]
    NotOpen(String),
}

impl DeviceError {
    /// Whether the failure belongs to the transport (and should trigger
    /// reconnection) rather than to a single read that merely timed out.
    pub fn is_transport(&self) -> bool {
        match self {
            DeviceError::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
            ),
            DeviceError::PermissionDenied(_) | DeviceError::NotFound | DeviceError::NotOpen(_) => {
                true
            }
        }
    }

    /// Map an open failure, keeping permission problems distinguishable.
    pub(crate) fn from_open(name: &str, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            DeviceError::PermissionDenied(name.to_string())
        } else {
            DeviceError::Io(err)
        }
    }
}

/// A source of raw positioning bytes.
pub trait Device: Send {
    /// Human-readable name (path, address, ...).
    fn name(&self) -> &str;

    /// Open the device. `read_timeout` bounds each subsequent read where the
    /// transport supports it.
    fn open(&mut self, read_timeout: Duration) -> Result<(), DeviceError>;

    /// Close the device. Closing a closed device is a no-op.
    fn close(&mut self);

    /// Close the device and discard any transport state so the next
    /// `open` starts clean.
    fn reset(&mut self) {
        self.close();
    }

    fn is_open(&self) -> bool;

    /// Read available bytes into `buf`. Returns `Ok(0)` at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;
}

/// Finds a device to use when none was supplied.
pub trait DeviceLocator: Send {
    fn locate(&mut self) -> Option<Box<dyn Device>>;
}

impl<F> DeviceLocator for F
where
    F: FnMut() -> Option<Box<dyn Device>> + Send,
{
    fn locate(&mut self) -> Option<Box<dyn Device>> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        let broken = DeviceError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(broken.is_transport());

        let timed_out = DeviceError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(!timed_out.is_transport());

        assert!(DeviceError::PermissionDenied("/dev/ttyUSB0".into()).is_transport());
        assert!(DeviceError::NotFound.is_transport());
    }

    #[test]
    fn test_open_error_mapping() {
        let err = DeviceError::from_open(
            "/dev/ttyS0",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, DeviceError::PermissionDenied(name) if name == "/dev/ttyS0"));

        let err = DeviceError::from_open("x", io::Error::new(io::ErrorKind::NotFound, "missing"));
        assert!(matches!(err, DeviceError::Io(_)));
    }

    #[test]
    fn test_closure_is_locator() {
        let mut calls = 0;
        let mut locator = move || -> Option<Box<dyn Device>> {
            calls += 1;
            if calls > 1 {
                Some(Box::new(FileDevice::new("/dev/null")))
            } else {
                None
            }
        };

        assert!(locator.locate().is_none());
        let device = locator.locate().unwrap();
        assert_eq!(device.name(), "/dev/null");
    }
}
