//! The interpreter seam: turning device bytes into model updates.

use super::context::PacketContext;
use super::error::PacketError;
use crate::device::Device;

/// Decodes packets from a device and publishes the results.
///
/// Implementations own their framing and grammar. The engine calls
/// [`read_packet`](Interpreter::read_packet) in a loop on its worker thread;
/// each call should read and fully process exactly one packet, pushing
/// every decoded value through the context setters so the precision gate
/// and notifications apply uniformly.
///
/// Return [`PacketError::Device`] with a transport error (end of stream is
/// conventionally `io::ErrorKind::UnexpectedEof`) when the device is gone;
/// the reconnection policy takes it from there. Any other error is
/// reported as an exception and the loop carries on.
pub trait Interpreter: Send {
    fn read_packet(
        &mut self,
        device: &mut dyn Device,
        ctx: &mut PacketContext<'_>,
    ) -> Result<(), PacketError>;

    /// Discard any partial-packet state. Called after every successful
    /// device open.
    fn on_device_changed(&mut self, device: &dyn Device) {
        let _ = device;
    }
}
