//! Precision filters - smoothing noisy position fixes.
//!
//! A [`PrecisionFilter`] fuses a raw position with the receiver's precision
//! metrics into a less noisy estimate. Filters are stateful and must be
//! initialized with a first raw position before they can filter; the engine
//! does that on the first usable fix and resets the filter whenever the
//! device changes.
//!
//! # Implementors
//!
//! - [`KalmanFilter`] - constant-velocity Kalman filter in a local frame
//! - [`PassThrough`] - returns raw positions unchanged

mod kalman;

pub use kalman::{KalmanFilter, DEFAULT_PROCESS_NOISE};

use crate::units::{Azimuth, Distance, Dop, Position, Speed};

/// Stateful position smoothing strategy.
pub trait PrecisionFilter: Send {
    fn is_initialized(&self) -> bool;

    /// Seed the filter with a raw position.
    fn initialize(&mut self, raw: Position);

    /// Fold a new raw position into the estimate and return the smoothed
    /// position. `bearing` and `speed` may be invalid when unknown.
    fn filter(
        &mut self,
        raw: Position,
        precision: Distance,
        horizontal_dop: Dop,
        vertical_dop: Dop,
        bearing: Azimuth,
        speed: Speed,
    ) -> Position;

    /// Discard all state; `is_initialized` becomes false.
    fn reset(&mut self);
}

/// A filter that never smooths.
#[derive(Debug, Default)]
pub struct PassThrough {
    initialized: bool,
}

impl PrecisionFilter for PassThrough {
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
        raw
    }

    fn reset(&mut self) {
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_through_returns_raw() {
        let mut filter = PassThrough::default();
        assert!(!filter.is_initialized());
        filter.initialize(Position::new(1.0, 1.0));
        assert!(filter.is_initialized());

        let raw = Position::new(1.5, 2.5);
        let out = filter.filter(
            raw,
            Distance::meters(6.0),
            Dop::new(1.0),
            Dop::new(1.0),
            Azimuth::INVALID,
            Speed::INVALID,
        );
        assert_eq!(out, raw);

        filter.reset();
        assert!(!filter.is_initialized());
    }
}
