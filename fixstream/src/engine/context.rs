//! Packet context: the precision gate every decoded value passes through.
//!
//! Interpreters never touch the model directly. Each setter applies the
//! same pipeline:
//!
//! ```text
//! invalid? --yes--> drop silently
//!    |no
//! fire Received(new value)
//!    |
//! equal to stored? --yes--> done
//!    |no
//! (position only) precision filter
//!    |
//! store, fire Changed(stored value)
//! ```
//!
//! A context whose worker has been cancelled publishes nothing, so an
//! abandoned worker cannot leak stale values after a restart.

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use super::gate::WorkerSignals;
use super::notify::{Measurement, Notification};
use super::shared::Shared;
use crate::model::DecodedState;
use crate::units::{
    Angle, Azimuth, Distance, Dop, FixMethod, FixMode, FixQuality, FixStatus, Position, Satellite,
    Speed, Validity,
};

/// Handle through which an interpreter publishes decoded values.
pub struct PacketContext<'a> {
    shared: &'a Shared,
    signals: &'a WorkerSignals,
}

impl<'a> PacketContext<'a> {
    pub(crate) fn new(shared: &'a Shared, signals: &'a WorkerSignals) -> Self {
        Self { shared, signals }
    }

    /// A clone of the current model.
    pub fn snapshot(&self) -> DecodedState {
        self.shared.model.read().clone()
    }

    fn is_stale(&self) -> bool {
        self.signals.is_cancelled()
    }

    fn publish(&self, notification: Notification) {
        self.shared.emit(notification);
    }

    /// Gate, compare, store. Returns true if the stored value changed.
    fn update<T>(
        &mut self,
        value: T,
        valid: bool,
        field: fn(&mut DecodedState) -> &mut Option<T>,
        wrap: fn(T) -> Measurement,
    ) -> bool
    where
        T: PartialEq + Clone,
    {
        if !valid || self.is_stale() {
            return false;
        }
        self.publish(Notification::Received(wrap(value.clone())));

        {
            let mut model = self.shared.model.write();
            let slot = field(&mut *model);
            if slot.as_ref() == Some(&value) {
                return false;
            }
            *slot = Some(value.clone());
        }

        self.publish(Notification::Changed(wrap(value)));
        true
    }

    /// As [`update`](Self::update) for enumerations that are always valid.
    /// Returns the previous value if it changed.
    fn update_enum<T>(
        &mut self,
        value: T,
        field: fn(&mut DecodedState) -> &mut T,
        wrap: fn(T) -> Measurement,
    ) -> Option<T>
    where
        T: PartialEq + Copy,
    {
        if self.is_stale() {
            return None;
        }
        self.publish(Notification::Received(wrap(value)));

        let previous = {
            let mut model = self.shared.model.write();
            let slot = field(&mut *model);
            if *slot == value {
                return None;
            }
            std::mem::replace(slot, value)
        };

        self.publish(Notification::Changed(wrap(value)));
        Some(previous)
    }

    /// Publish a raw position. When the filter is enabled and both DOP
    /// values are known, the stored position is the filtered estimate.
    pub fn set_position(&mut self, raw: Position) {
        if !raw.is_valid() || self.is_stale() {
            return;
        }
        self.publish(Notification::Received(Measurement::Position(raw)));

        let (filter_enabled, precision) = {
            let config = self.shared.config.read();
            (config.filter_enabled(), config.device_precision())
        };

        let position = {
            let mut model = self.shared.model.write();
            if model.position == Some(raw) {
                return;
            }
            let position = if filter_enabled {
                self.smooth(raw, precision, &model)
            } else {
                raw
            };
            model.position = Some(position);
            position
        };

        trace!(position = %position, "Position changed");
        self.shared.notifier.publish_position(position);
        self.publish(Notification::Changed(Measurement::Position(position)));
    }

    fn smooth(&self, raw: Position, precision: Distance, model: &DecodedState) -> Position {
        let (Some(hdop), Some(vdop)) = (model.horizontal_dop, model.vertical_dop) else {
            return raw;
        };

        let quality = precision.as_meters() * hdop.value() * vdop.value();
        if quality == 0.0 || !quality.is_finite() {
            return raw;
        }

        let mut filter = self.shared.filter.lock();
        if !filter.is_initialized() {
            debug!(position = %raw, "Initializing precision filter");
            filter.initialize(raw);
            return raw;
        }

        let filtered = filter.filter(
            raw,
            precision,
            hdop,
            vdop,
            model.bearing.unwrap_or(Azimuth::INVALID),
            model.speed.unwrap_or(Speed::INVALID),
        );
        if filtered.is_valid() {
            filtered
        } else {
            warn!(raw = %raw, filtered = %filtered, "Filter produced an invalid position, storing raw");
            raw
        }
    }

    pub fn set_speed(&mut self, speed: Speed) {
        self.update(speed, speed.is_valid(), |m| &mut m.speed, Measurement::Speed);
    }

    pub fn set_bearing(&mut self, bearing: Azimuth) {
        self.update(
            bearing,
            bearing.is_valid(),
            |m| &mut m.bearing,
            Measurement::Bearing,
        );
    }

    /// Altitude above mean sea level.
    pub fn set_altitude(&mut self, altitude: Distance) {
        self.update(
            altitude,
            altitude.is_valid(),
            |m| &mut m.altitude,
            Measurement::Altitude,
        );
    }

    pub fn set_altitude_above_ellipsoid(&mut self, altitude: Distance) {
        self.update(
            altitude,
            altitude.is_valid(),
            |m| &mut m.altitude_above_ellipsoid,
            Measurement::AltitudeAboveEllipsoid,
        );
    }

    pub fn set_geoidal_separation(&mut self, separation: Distance) {
        self.update(
            separation,
            separation.is_valid(),
            |m| &mut m.geoidal_separation,
            Measurement::GeoidalSeparation,
        );
    }

    pub fn set_magnetic_variation(&mut self, variation: Angle) {
        self.update(
            variation,
            variation.is_valid(),
            |m| &mut m.magnetic_variation,
            Measurement::MagneticVariation,
        );
    }

    pub fn set_horizontal_dop(&mut self, dop: Dop) {
        self.update(
            dop,
            dop.is_valid(),
            |m| &mut m.horizontal_dop,
            Measurement::HorizontalDop,
        );
    }

    pub fn set_vertical_dop(&mut self, dop: Dop) {
        self.update(
            dop,
            dop.is_valid(),
            |m| &mut m.vertical_dop,
            Measurement::VerticalDop,
        );
    }

    pub fn set_mean_dop(&mut self, dop: Dop) {
        self.update(dop, dop.is_valid(), |m| &mut m.mean_dop, Measurement::MeanDop);
    }

    pub fn set_utc_date_time(&mut self, timestamp: DateTime<Utc>) {
        self.update(
            timestamp,
            true,
            |m| &mut m.utc_date_time,
            Measurement::UtcDateTime,
        );
    }

    /// Publish the fix status. Entering `Fix` fires
    /// [`Notification::FixAcquired`]; leaving it fires
    /// [`Notification::FixLost`].
    pub fn set_fix_status(&mut self, status: FixStatus) {
        let Some(previous) =
            self.update_enum(status, |m| &mut m.fix_status, Measurement::FixStatus)
        else {
            return;
        };

        if status == FixStatus::Fix {
            debug!("Fix acquired");
            self.publish(Notification::FixAcquired);
        } else if previous == FixStatus::Fix {
            debug!(status = ?status, "Fix lost");
            self.publish(Notification::FixLost);
        }
    }

    pub fn set_fix_mode(&mut self, mode: FixMode) {
        self.update_enum(mode, |m| &mut m.fix_mode, Measurement::FixMode);
    }

    pub fn set_fix_method(&mut self, method: FixMethod) {
        self.update_enum(method, |m| &mut m.fix_method, Measurement::FixMethod);
    }

    pub fn set_fix_quality(&mut self, quality: FixQuality) {
        self.update_enum(quality, |m| &mut m.fix_quality, Measurement::FixQuality);
    }

    /// Merge satellites in view. Entries with PRN 0 are dropped.
    pub fn set_satellites(&mut self, satellites: &[Satellite]) {
        let valid: Vec<Satellite> = satellites.iter().filter(|s| s.is_valid()).copied().collect();
        if valid.is_empty() || self.is_stale() {
            return;
        }
        self.publish(Notification::Received(Measurement::Satellites(valid.clone())));

        let merged = {
            let mut model = self.shared.model.write();
            if !model.merge_satellites(&valid) {
                return;
            }
            model.satellites().copied().collect()
        };

        self.publish(Notification::Changed(Measurement::Satellites(merged)));
    }

    /// Mark exactly these PRNs as participating in the fix.
    pub fn set_fixed_satellites(&mut self, prns: &[u16]) {
        if self.is_stale() {
            return;
        }
        let mut prns: Vec<u16> = prns.iter().copied().filter(|&prn| prn != 0).collect();
        prns.sort_unstable();
        prns.dedup();
        self.publish(Notification::Received(Measurement::FixedSatelliteCount(
            prns.len(),
        )));

        let count = {
            let mut model = self.shared.model.write();
            if !model.mark_fixed(&prns) {
                return;
            }
            model.fixed_satellite_count
        };

        self.publish(Notification::Changed(Measurement::FixedSatelliteCount(count)));
    }

    /// Append a raw packet to the recording, if one is active. A failing
    /// sink ends the recording.
    pub fn record(&mut self, packet: &[u8]) {
        let mut slot = self.shared.recorder.lock();
        if let Some(recorder) = slot.as_mut() {
            if let Err(e) = recorder.write(packet) {
                warn!(
                    error = %e,
                    bytes_written = recorder.bytes_written(),
                    "Recording failed, stopping recording"
                );
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::device::Device;
    use crate::engine::error::PacketError;
    use crate::engine::interpreter::Interpreter;
    use crate::engine::recording::Recorder;
    use crate::filter::{PassThrough, PrecisionFilter};
    use proptest::prelude::*;
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast::Receiver;

    struct Idle;

    impl Interpreter for Idle {
        fn read_packet(
            &mut self,
            _device: &mut dyn Device,
            _ctx: &mut PacketContext<'_>,
        ) -> Result<(), PacketError> {
            Ok(())
        }
    }

    /// Filter that shifts latitude by a fixed amount and counts calls.
    #[derive(Default)]
    struct Shifting {
        initialized: bool,
        calls: Arc<AtomicUsize>,
    }

    impl PrecisionFilter for Shifting {
        fn is_initialized(&self) -> bool {
            self.initialized
        }

        fn initialize(&mut self, _raw: Position) {
            self.initialized = true;
        }

        fn filter(
            &mut self,
            raw: Position,
            _precision: Distance,
            _horizontal_dop: Dop,
            _vertical_dop: Dop,
            _bearing: Azimuth,
            _speed: Speed,
        ) -> Position {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Position::new(raw.latitude + 0.5, raw.longitude)
        }

        fn reset(&mut self) {
            self.initialized = false;
        }
    }

    fn shared_with(filter: Box<dyn PrecisionFilter>) -> Shared {
        Shared::new(Box::new(Idle), None, filter, EngineConfig::default())
    }

    fn shared() -> Shared {
        shared_with(Box::new(PassThrough::default()))
    }

    fn drain(rx: &mut Receiver<Notification>) -> Vec<Notification> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_received_precedes_changed() {
        let shared = shared();
        let signals = WorkerSignals::default();
        let mut rx = shared.notifier.subscribe().unwrap();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_speed(Speed::meters_per_second(3.0));
        let events = drain(&mut rx);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            Notification::Received(Measurement::Speed(s)) if s.0 == 3.0
        ));
        assert!(matches!(
            events[1],
            Notification::Changed(Measurement::Speed(s)) if s.0 == 3.0
        ));
        assert_eq!(
            shared.model.read().speed,
            Some(Speed::meters_per_second(3.0))
        );
    }

    #[test]
    fn test_unchanged_value_only_fires_received() {
        let shared = shared();
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);
        ctx.set_bearing(Azimuth::degrees(90.0));

        let mut rx = shared.notifier.subscribe().unwrap();
        ctx.set_bearing(Azimuth::degrees(90.0));
        let events = drain(&mut rx);

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Notification::Received(Measurement::Bearing(_))
        ));
    }

    #[test]
    fn test_invalid_value_is_dropped_silently() {
        let shared = shared();
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);
        ctx.set_horizontal_dop(Dop::new(2.0));

        let mut rx = shared.notifier.subscribe().unwrap();
        ctx.set_horizontal_dop(Dop::new(f64::NAN));
        ctx.set_horizontal_dop(Dop::new(51.0));
        ctx.set_position(Position::INVALID);

        assert!(drain(&mut rx).is_empty());
        assert_eq!(shared.model.read().horizontal_dop, Some(Dop::new(2.0)));
        assert!(shared.model.read().position.is_none());
    }

    #[test]
    fn test_filter_bypassed_on_zero_dop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with(Box::new(Shifting {
            initialized: true,
            calls: Arc::clone(&calls),
        }));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_horizontal_dop(Dop::new(0.0));
        ctx.set_vertical_dop(Dop::new(1.0));
        let raw = Position::new(10.0, 20.0);
        ctx.set_position(raw);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.model.read().position, Some(raw));
    }

    #[test]
    fn test_filter_bypassed_without_dop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with(Box::new(Shifting {
            initialized: true,
            calls: Arc::clone(&calls),
        }));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_position(Position::new(10.0, 20.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_filter_initialized_then_applied() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with(Box::new(Shifting {
            initialized: false,
            calls: Arc::clone(&calls),
        }));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);
        ctx.set_horizontal_dop(Dop::new(1.0));
        ctx.set_vertical_dop(Dop::new(1.0));

        // First fix seeds the filter and is stored raw
        ctx.set_position(Position::new(10.0, 20.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.model.read().position, Some(Position::new(10.0, 20.0)));

        let mut rx = shared.notifier.subscribe().unwrap();
        let mut position = shared.notifier.watch_position().unwrap();
        ctx.set_position(Position::new(11.0, 20.0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let filtered = Position::new(11.5, 20.0);
        assert_eq!(shared.model.read().position, Some(filtered));
        assert_eq!(*position.borrow_and_update(), Some(filtered));

        // Received carries the raw value, changed the stored one
        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            Notification::Received(Measurement::Position(p)) if p == Position::new(11.0, 20.0)
        ));
        assert!(matches!(
            events[1],
            Notification::Changed(Measurement::Position(p)) if p == filtered
        ));
    }

    #[test]
    fn test_filter_disabled_stores_raw() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with(Box::new(Shifting {
            initialized: true,
            calls: Arc::clone(&calls),
        }));
        shared.config.write().set_filter_enabled(false);
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);
        ctx.set_horizontal_dop(Dop::new(1.0));
        ctx.set_vertical_dop(Dop::new(1.0));

        ctx.set_position(Position::new(10.0, 20.0));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.model.read().position, Some(Position::new(10.0, 20.0)));
    }

    #[test]
    fn test_invalid_filter_output_stores_raw() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shared = shared_with(Box::new(Shifting {
            initialized: true,
            calls: Arc::clone(&calls),
        }));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);
        ctx.set_horizontal_dop(Dop::new(1.0));
        ctx.set_vertical_dop(Dop::new(1.0));

        // Shifting pushes latitude past the pole
        let raw = Position::new(89.8, 20.0);
        ctx.set_position(raw);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.model.read().position, Some(raw));
    }

    #[test]
    fn test_dop_above_threshold_still_stored() {
        let shared = shared();
        shared.config.write().set_max_horizontal_dop(4.0).unwrap();
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_horizontal_dop(Dop::new(8.0));
        let model = shared.model.read();
        assert_eq!(model.horizontal_dop, Some(Dop::new(8.0)));
        assert!(!model.is_fix_usable(&shared.config.read()));
    }

    #[test]
    fn test_fix_transitions() {
        let shared = shared();
        let signals = WorkerSignals::default();
        let mut rx = shared.notifier.subscribe().unwrap();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_fix_status(FixStatus::NoFix);
        ctx.set_fix_status(FixStatus::Fix);
        ctx.set_fix_status(FixStatus::Fix);
        ctx.set_fix_status(FixStatus::NoFix);

        let fix_events: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Notification::FixAcquired | Notification::FixLost))
            .collect();
        assert_eq!(fix_events.len(), 2);
        assert!(matches!(fix_events[0], Notification::FixAcquired));
        assert!(matches!(fix_events[1], Notification::FixLost));
    }

    #[test]
    fn test_satellites_merge_and_fixed_count() {
        let shared = shared();
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_satellites(&[
            Satellite::new(4, Azimuth::degrees(10.0), 30.0, 40.0),
            Satellite::new(0, Azimuth::degrees(10.0), 30.0, 40.0),
            Satellite::new(9, Azimuth::degrees(200.0), 60.0, 35.0),
        ]);
        assert_eq!(shared.model.read().satellites.len(), 2);

        let mut rx = shared.notifier.subscribe().unwrap();
        ctx.set_fixed_satellites(&[9, 9, 0]);
        let events = drain(&mut rx);
        assert!(matches!(
            events[0],
            Notification::Received(Measurement::FixedSatelliteCount(1))
        ));
        assert!(matches!(
            events[1],
            Notification::Changed(Measurement::FixedSatelliteCount(1))
        ));
        assert!(shared.model.read().satellites[&9].is_fixed);
    }

    #[test]
    fn test_cancelled_context_publishes_nothing() {
        let shared = shared();
        let signals = WorkerSignals::default();
        signals.cancel();
        let mut rx = shared.notifier.subscribe().unwrap();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.set_speed(Speed::meters_per_second(1.0));
        ctx.set_fix_status(FixStatus::Fix);
        ctx.set_position(Position::new(1.0, 1.0));

        assert!(drain(&mut rx).is_empty());
        assert_eq!(*shared.model.read(), DecodedState::default());
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failing_recording_is_stopped() {
        let shared = shared();
        *shared.recorder.lock() = Some(Recorder::new(Broken));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.record(b"$GPGGA");
        assert!(shared.recorder.lock().is_none());
    }

    #[test]
    fn test_record_appends_to_sink() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("raw.log");
        let shared = shared();
        *shared.recorder.lock() = Some(Recorder::new(std::fs::File::create(&path).unwrap()));
        let signals = WorkerSignals::default();
        let mut ctx = PacketContext::new(&shared, &signals);

        ctx.record(b"one,");
        ctx.record(b"two");
        assert_eq!(shared.finish_recording(), Some(7));
        assert_eq!(std::fs::read(&path).unwrap(), b"one,two");
    }

    proptest! {
        #[test]
        fn prop_invalid_speed_never_overwrites(
            first in 0.0f64..500.0,
            rest in prop::collection::vec(
                prop_oneof![
                    Just(f64::NAN),
                    Just(f64::INFINITY),
                    Just(f64::NEG_INFINITY),
                    -1000.0f64..-0.001,
                ],
                0..20,
            ),
        ) {
            let shared = shared();
            let signals = WorkerSignals::default();
            let mut ctx = PacketContext::new(&shared, &signals);

            ctx.set_speed(Speed::meters_per_second(first));
            for value in rest {
                ctx.set_speed(Speed::meters_per_second(value));
            }
            prop_assert_eq!(shared.model.read().speed, Some(Speed::meters_per_second(first)));
        }

        #[test]
        fn prop_changed_always_follows_received(
            values in prop::collection::vec(
                prop_oneof![Just(f64::NAN), 0.0f64..50.0, 50.0f64..100.0],
                1..30,
            ),
        ) {
            let shared = shared();
            let signals = WorkerSignals::default();
            let mut rx = shared.notifier.subscribe().unwrap();
            let mut ctx = PacketContext::new(&shared, &signals);

            for value in &values {
                ctx.set_mean_dop(Dop::new(*value));
            }

            let events = drain(&mut rx);
            for (i, event) in events.iter().enumerate() {
                if let Notification::Changed(changed) = event {
                    prop_assert!(i > 0);
                    match &events[i - 1] {
                        Notification::Received(received) => prop_assert_eq!(received, changed),
                        other => prop_assert!(false, "changed preceded by {:?}", other),
                    }
                }
            }
            let received = events
                .iter()
                .filter(|e| matches!(e, Notification::Received(_)))
                .count();
            let valid = values.iter().filter(|v| Dop::new(**v).is_valid()).count();
            prop_assert_eq!(received, valid);
        }
    }
}
