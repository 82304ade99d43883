//! Kalman filter for 2D positions.
//!
//! Positions are projected into a local north/east frame (metres) around
//! the first fix using an equirectangular approximation, which is accurate
//! to well under a metre over the distances a receiver moves between fixes.
//!
//! # Model
//!
//! ```text
//! predict:  x += v·dt·(cos b, sin b)      P += q·dt
//! measure:  R  = (precision · hdop)²
//! update:   K  = P / (P + R)   x += K·(z - x)   P *= (1 - K)
//! ```
//!
//! Velocity is taken from the receiver's reported speed and bearing rather
//! than estimated, so a stationary receiver with no bearing simply averages.

use std::time::{Duration, Instant};

use super::PrecisionFilter;
use crate::units::{Azimuth, Distance, Dop, Position, Speed, Validity, EARTH_RADIUS_METERS};

/// Default process noise in m²/s: how far the true position may wander per
/// second beyond what speed and bearing explain.
pub const DEFAULT_PROCESS_NOISE: f64 = 4.0;

/// Gaps longer than this are treated as this long; a receiver coming back
/// after minutes should not extrapolate across the whole outage.
const MAX_PREDICTION_STEP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct Estimate {
    origin: Position,
    north: f64,
    east: f64,
    variance: f64,
    updated_at: Instant,
}

impl Estimate {
    fn project(&self, position: Position) -> (f64, f64) {
        let north = (position.latitude - self.origin.latitude).to_radians() * EARTH_RADIUS_METERS;
        let east = wrap_longitude(position.longitude - self.origin.longitude).to_radians()
            * EARTH_RADIUS_METERS
            * self.origin.latitude.to_radians().cos();
        (north, east)
    }

    fn unproject(&self) -> Position {
        let latitude = self.origin.latitude + (self.north / EARTH_RADIUS_METERS).to_degrees();
        let cos_lat = self.origin.latitude.to_radians().cos().max(1e-9);
        let longitude = wrap_longitude(
            self.origin.longitude + (self.east / (EARTH_RADIUS_METERS * cos_lat)).to_degrees(),
        );
        Position::new(latitude, longitude)
    }
}

/// Wrap a longitude (or longitude difference) into [-180, 180).
fn wrap_longitude(degrees: f64) -> f64 {
    (degrees + 180.0).rem_euclid(360.0) - 180.0
}

/// Constant-velocity Kalman filter.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    process_noise: f64,
    estimate: Option<Estimate>,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        Self::with_process_noise(DEFAULT_PROCESS_NOISE)
    }

    pub fn with_process_noise(process_noise: f64) -> Self {
        Self {
            process_noise,
            estimate: None,
        }
    }

    /// Current estimate variance in m², if initialized.
    pub fn variance(&self) -> Option<f64> {
        self.estimate.map(|e| e.variance)
    }

    #[allow(clippy::too_many_arguments)]
    fn filter_at(
        &mut self,
        raw: Position,
        precision: Distance,
        horizontal_dop: Dop,
        bearing: Azimuth,
        speed: Speed,
        now: Instant,
    ) -> Position {
        let measurement_sigma = precision.as_meters() * horizontal_dop.value();
        let measurement_variance = measurement_sigma * measurement_sigma;

        let Some(estimate) = self.estimate.as_mut() else {
            self.seed(raw, measurement_variance, now);
            return raw;
        };

        let dt = now
            .saturating_duration_since(estimate.updated_at)
            .min(MAX_PREDICTION_STEP)
            .as_secs_f64();

        // Predict
        if speed.is_valid() && bearing.is_valid() {
            let travelled = speed.as_meters_per_second() * dt;
            let heading = bearing.as_degrees().to_radians();
            estimate.north += travelled * heading.cos();
            estimate.east += travelled * heading.sin();
        }
        estimate.variance += self.process_noise * dt;

        // Update
        let (z_north, z_east) = estimate.project(raw);
        let gain = estimate.variance / (estimate.variance + measurement_variance);
        estimate.north += gain * (z_north - estimate.north);
        estimate.east += gain * (z_east - estimate.east);
        estimate.variance *= 1.0 - gain;
        estimate.updated_at = now;

        estimate.unproject()
    }

    fn seed(&mut self, raw: Position, variance: f64, now: Instant) {
        self.estimate = Some(Estimate {
            origin: raw,
            north: 0.0,
            east: 0.0,
            variance: if variance.is_finite() && variance > 0.0 {
                variance
            } else {
                DEFAULT_PROCESS_NOISE
            },
            updated_at: now,
        });
    }
}

impl PrecisionFilter for KalmanFilter {
    fn is_initialized(&self) -> bool {
        self.estimate.is_some()
    }

    fn initialize(&mut self, raw: Position) {
        self.seed(raw, f64::NAN, Instant::now());
    }

    fn filter(
        &mut self,
        raw: Position,
        precision: Distance,
        horizontal_dop: Dop,
        _vertical_dop: Dop,
        bearing: Azimuth,
        speed: Speed,
    ) -> Position {
        self.filter_at(raw, precision, horizontal_dop, bearing, speed, Instant::now())
    }

    fn reset(&mut self) {
        self.estimate = None;
    }
}
