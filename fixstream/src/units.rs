//! Scalar value carriers for positioning measurements.
//!
//! These are thin, immutable wrappers around `f64` that know whether the
//! value they carry is usable. Decoders construct them from raw fields; the
//! engine's precision gate drops anything that fails [`Validity::is_valid`].
//!
//! | Type        | Unit               | Valid range            |
//! |-------------|--------------------|------------------------|
//! | [`Position`]| degrees            | lat ±90, lon ±180      |
//! | [`Speed`]   | metres per second  | finite, >= 0           |
//! | [`Azimuth`] | degrees from north | finite (normalized)    |
//! | [`Angle`]   | signed degrees     | finite                 |
//! | [`Distance`]| metres             | finite                 |
//! | [`Dop`]     | unitless           | finite, 0 < x <= 50    |

use std::fmt;

/// Mean Earth radius used for local projections, in metres.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Worst dilution of precision a receiver reports.
pub const WORST_DOP: f64 = 50.0;

/// Knots to metres per second.
const METERS_PER_SECOND_PER_KNOT: f64 = 0.514_444;

/// Whether a decoded value is fit to enter the model.
pub trait Validity {
    /// Returns true if the value is finite and within its domain.
    fn is_valid(&self) -> bool;
}

/// A 2D geographic position in decimal degrees (WGS84).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Latitude in degrees (-90 to 90).
    pub latitude: f64,
    /// Longitude in degrees (-180 to 180).
    pub longitude: f64,
}

impl Position {
    /// An invalid position, as a decoder reports an empty field.
    pub const INVALID: Self = Self {
        latitude: f64::NAN,
        longitude: f64::NAN,
    };

    /// Create a position from latitude and longitude in degrees.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another position (haversine).
    pub fn distance_to(&self, other: &Position) -> Distance {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        Distance::meters(EARTH_RADIUS_METERS * c)
    }
}

impl Validity for Position {
    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Ground speed in metres per second.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Speed(pub f64);

impl Speed {
    pub const INVALID: Self = Self(f64::NAN);

    pub fn meters_per_second(value: f64) -> Self {
        Self(value)
    }

    pub fn knots(value: f64) -> Self {
        Self(value * METERS_PER_SECOND_PER_KNOT)
    }

    pub fn as_meters_per_second(&self) -> f64 {
        self.0
    }

    pub fn as_knots(&self) -> f64 {
        self.0 / METERS_PER_SECOND_PER_KNOT
    }
}

impl Validity for Speed {
    fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }
}

/// Bearing in degrees clockwise from true north, normalized to [0, 360).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Azimuth(f64);

impl Azimuth {
    pub const INVALID: Self = Self(f64::NAN);

    /// Create an azimuth, wrapping the value into [0, 360).
    pub fn degrees(value: f64) -> Self {
        if value.is_finite() {
            Self(value.rem_euclid(360.0))
        } else {
            Self(value)
        }
    }

    pub fn as_degrees(&self) -> f64 {
        self.0
    }
}

impl Validity for Azimuth {
    fn is_valid(&self) -> bool {
        self.0.is_finite()
    }
}

/// Signed angle in degrees (magnetic variation: east positive).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Angle(pub f64);

impl Angle {
    pub const INVALID: Self = Self(f64::NAN);

    pub fn degrees(value: f64) -> Self {
        Self(value)
    }

    pub fn as_degrees(&self) -> f64 {
        self.0
    }
}

impl Validity for Angle {
    fn is_valid(&self) -> bool {
        self.0.is_finite()
    }
}

/// Linear distance in metres.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Distance(pub f64);

impl Distance {
    pub const INVALID: Self = Self(f64::NAN);

    pub fn meters(value: f64) -> Self {
        Self(value)
    }

    pub fn as_meters(&self) -> f64 {
        self.0
    }
}

impl Validity for Distance {
    fn is_valid(&self) -> bool {
        self.0.is_finite()
    }
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} m", self.0)
    }
}

/// Dilution of precision. Lower is better; 1.0 is ideal, 50.0 is worst.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dop(pub f64);

impl Dop {
    pub const INVALID: Self = Self(f64::NAN);

    /// The worst rating a receiver reports.
    pub const MAXIMUM: Self = Self(WORST_DOP);

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Whether the value lies in the configurable threshold range (0, 50].
    pub fn is_threshold(value: f64) -> bool {
        value.is_finite() && value > 0.0 && value <= WORST_DOP
    }

    /// Qualitative rating, as receivers usually describe DOP.
    pub fn rating(&self) -> DopRating {
        match self.0 {
            v if v <= 1.0 => DopRating::Ideal,
            v if v <= 2.0 => DopRating::Excellent,
            v if v <= 5.0 => DopRating::Good,
            v if v <= 10.0 => DopRating::Moderate,
            v if v <= 20.0 => DopRating::Fair,
            _ => DopRating::Poor,
        }
    }
}

impl Validity for Dop {
    // Zero is accepted into the model: it is how receivers report
    // "unknown" precision, and the filter treats it as degenerate.
    fn is_valid(&self) -> bool {
        self.0.is_finite() && self.0 >= 0.0 && self.0 <= WORST_DOP
    }
}

/// Qualitative DOP rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DopRating {
    Ideal,
    Excellent,
    Good,
    Moderate,
    Fair,
    Poor,
}

/// Whether the receiver currently has a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixStatus {
    #[default]
    Unknown,
    NoFix,
    Fix,
}

/// How the receiver selects between 2D and 3D solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixMode {
    #[default]
    Unknown,
    Automatic,
    Manual,
}

/// Dimensionality of the current solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixMethod {
    #[default]
    Unknown,
    NoFix,
    Fix2D,
    Fix3D,
}

/// Quality of the current solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixQuality {
    #[default]
    Unknown,
    NoFix,
    GpsFix,
    DifferentialGpsFix,
    PulsePerSecond,
    FixedRealTimeKinematic,
    FloatRealTimeKinematic,
    Estimated,
    ManualInput,
    Simulated,
}

/// A satellite in view, keyed by its pseudorandom number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Satellite {
    /// Pseudorandom identifier.
    pub prn: u16,
    /// Azimuth from the receiver.
    pub azimuth: Azimuth,
    /// Elevation above the horizon in degrees.
    pub elevation: f64,
    /// Signal-to-noise ratio in dB-Hz.
    pub snr: f64,
    /// Whether the satellite participates in the current fix.
    pub is_fixed: bool,
}

impl Satellite {
    pub fn new(prn: u16, azimuth: Azimuth, elevation: f64, snr: f64) -> Self {
        Self {
            prn,
            azimuth,
            elevation,
            snr,
            is_fixed: false,
        }
    }

    /// Field-wise equality where unknown (NaN) readings compare equal.
    pub fn same_reading(&self, other: &Satellite) -> bool {
        fn eq(a: f64, b: f64) -> bool {
            a == b || (a.is_nan() && b.is_nan())
        }
        self.prn == other.prn
            && self.is_fixed == other.is_fixed
            && eq(self.azimuth.as_degrees(), other.azimuth.as_degrees())
            && eq(self.elevation, other.elevation)
            && eq(self.snr, other.snr)
    }
}

impl Validity for Satellite {
    fn is_valid(&self) -> bool {
        self.prn != 0
    }
}
