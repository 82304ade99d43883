//! Raw packet recording.
//!
//! Interpreters hand every raw packet to [`PacketContext::record`]; when a
//! recorder is installed the bytes are appended to its sink. Recording has
//! its own lock so a slow sink never contends with lifecycle commands.
//!
//! [`PacketContext::record`]: super::PacketContext::record

use std::fmt;
use std::io::{self, Write};

/// Appends raw packets to a sink.
pub struct Recorder {
    sink: Box<dyn Write + Send>,
    bytes_written: u64,
}

impl Recorder {
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Box::new(sink),
            bytes_written: 0,
        }
    }

    pub fn write(&mut self, packet: &[u8]) -> io::Result<()> {
        self.sink.write_all(packet)?;
        self.bytes_written += packet.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush the sink and return the total bytes recorded.
    pub fn finish(mut self) -> io::Result<u64> {
        self.sink.flush()?;
        Ok(self.bytes_written)
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}
