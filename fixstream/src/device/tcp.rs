//! Raw positioning stream over TCP (receivers and multiplexers that serve
//! their output on a socket).

use std::io::Read;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use super::{Device, DeviceError};

/// Connect timeout used when opening the socket.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A TCP-connected device.
#[derive(Debug)]
pub struct TcpDevice {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpDevice {
    /// Create a device for `host:port`. Resolution happens on open.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }

    fn resolve(&self) -> Result<SocketAddr, DeviceError> {
        self.address
            .to_socket_addrs()?
            .next()
            .ok_or(DeviceError::NotFound)
    }
}

impl Device for TcpDevice {
    fn name(&self) -> &str {
        &self.address
    }

    fn open(&mut self, read_timeout: Duration) -> Result<(), DeviceError> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)
            .map_err(|e| DeviceError::from_open(&self.address, e))?;
        stream.set_read_timeout(Some(read_timeout))?;
        debug!(address = %self.address, "TCP device connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!(address = %self.address, "TCP device closed");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DeviceError::NotOpen(self.address.clone()))?;
        Ok(stream.read(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_reads_from_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"$GPRMC,hello\r\n").unwrap();
        });

        let mut device = TcpDevice::new(addr.to_string());
        device.open(Duration::from_secs(2)).unwrap();
        assert!(device.is_open());

        let mut buf = [0u8; 64];
        let mut total = Vec::new();
        while total.len() < 14 {
            let n = device.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total.extend_from_slice(&buf[..n]);
        }
        assert_eq!(total, b"$GPRMC,hello\r\n");

        server.join().unwrap();
        device.close();
        assert!(!device.is_open());
    }

    #[test]
    fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port with nothing listening
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut device = TcpDevice::new(format!("127.0.0.1:{}", port));
        let err = device.open(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_transport());
    }
}
