//! Notification pipeline.
//!
//! Two delivery paths leave the engine:
//!
//! - **Ordered stream** - every [`Notification`] goes to a bounded
//!   `tokio::sync::broadcast` channel. Producers never block; a subscriber
//!   that falls behind skips ahead to the newest retained events and sees
//!   `RecvError::Lagged`.
//! - **Latest value** - the current position is kept in a
//!   `tokio::sync::watch` slot. Consumers that only care about "where am I
//!   now" read it without ever seeing a backlog.
//!
//! Both are plain synchronization primitives; no async runtime is needed
//! to publish, and receivers can be polled from any executor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};

use super::error::PacketError;
use crate::units::{
    Angle, Azimuth, Distance, Dop, FixMethod, FixMode, FixQuality, FixStatus, Position, Satellite,
    Speed,
};

/// A decoded measurement, as carried by received/changed notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Position(Position),
    Speed(Speed),
    Bearing(Azimuth),
    Altitude(Distance),
    AltitudeAboveEllipsoid(Distance),
    GeoidalSeparation(Distance),
    MagneticVariation(Angle),
    HorizontalDop(Dop),
    VerticalDop(Dop),
    MeanDop(Dop),
    FixStatus(FixStatus),
    FixMode(FixMode),
    FixMethod(FixMethod),
    FixQuality(FixQuality),
    /// Satellites in view. Received carries the incoming batch, changed
    /// carries the merged set.
    Satellites(Vec<Satellite>),
    FixedSatelliteCount(usize),
    UtcDateTime(DateTime<Utc>),
}

/// Everything the engine publishes, in order.
#[derive(Debug, Clone)]
pub enum Notification {
    /// A valid value arrived (fires even if unchanged).
    Received(Measurement),
    /// The stored value changed.
    Changed(Measurement),

    Starting,
    Started,
    Stopping,
    Stopped,
    Paused,
    Resumed,

    FixAcquired,
    FixLost,

    /// The transport failed; the reconnection policy takes over.
    ConnectionLost(Arc<PacketError>),
    /// A non-transport failure; the read loop continues.
    ExceptionOccurred(Arc<PacketError>),
    /// A device was opened.
    DeviceChanged { name: String },
    /// A stop or dispose gave up waiting for a worker stuck in a read. The
    /// worker still holds `device`, which stays open until the read returns.
    WorkerAbandoned { device: Option<String> },
}

impl Notification {
    /// Whether this is one of the six lifecycle events.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Notification::Starting
                | Notification::Started
                | Notification::Stopping
                | Notification::Stopped
                | Notification::Paused
                | Notification::Resumed
        )
    }
}

struct Channels {
    events: broadcast::Sender<Notification>,
    position: watch::Sender<Option<Position>>,
}

/// Publishing side of both delivery paths. Closing drops the senders, which
/// ends every subscription.
pub(crate) struct Notifier {
    channels: RwLock<Option<Channels>>,
}

impl Notifier {
    pub(crate) fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (position, _) = watch::channel(None);
        Self {
            channels: RwLock::new(Some(Channels { events, position })),
        }
    }

    pub(crate) fn emit(&self, notification: Notification) {
        if let Some(channels) = self.channels.read().as_ref() {
            // No subscribers is not an error
            let _ = channels.events.send(notification);
        }
    }

    pub(crate) fn publish_position(&self, position: Position) {
        if let Some(channels) = self.channels.read().as_ref() {
            channels.position.send_replace(Some(position));
        }
    }

    pub(crate) fn subscribe(&self) -> Option<broadcast::Receiver<Notification>> {
        self.channels.read().as_ref().map(|c| c.events.subscribe())
    }

    pub(crate) fn watch_position(&self) -> Option<watch::Receiver<Option<Position>>> {
        self.channels.read().as_ref().map(|c| c.position.subscribe())
    }

    pub(crate) fn close(&self) {
        self.channels.write().take();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.channels.read().is_none()
    }
}
