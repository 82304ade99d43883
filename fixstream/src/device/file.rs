//! Path-backed device: recorded logs, FIFOs and character devices.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use super::{Device, DeviceError};

/// A device read from a filesystem path.
///
/// Works for `/dev/ttyUSB0`-style character devices whose line settings are
/// configured externally, for named pipes, and for recorded logs. End of
/// stream surfaces as `Ok(0)`; interpreters usually turn it into a
/// transport failure so the reconnection policy decides whether to reopen.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    name: String,
    file: Option<File>,
}

impl FileDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: path.display().to_string(),
            path,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Device for FileDevice {
    fn name(&self) -> &str {
        &self.name
    }

    // Files have no socket-level timeout; the bound is left to the OS.
    fn open(&mut self, _read_timeout: Duration) -> Result<(), DeviceError> {
        let file = File::open(&self.path).map_err(|e| DeviceError::from_open(&self.name, e))?;
        debug!(path = %self.name, "File device opened");
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.name, "File device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| DeviceError::NotOpen(self.name.clone()))?;
        Ok(file.read(buf)?)
    }
}
