//! Validated engine configuration.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::units::{Distance, Dop, WORST_DOP};

/// Default time a lifecycle command waits for the command lock.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Shortest command timeout accepted.
pub const MINIMUM_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Default bound on a single device read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default average precision of a consumer receiver, in metres.
pub const DEFAULT_DEVICE_PRECISION_METERS: f64 = 6.0;

/// Default number of events buffered per notification subscriber.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

/// Configuration errors. Raised synchronously; nothing is stored.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Command timeout below the one second floor.
    #[error("command timeout {0:?} is below the minimum of 1s")]
    CommandTimeoutTooShort(Duration),

    /// A timeout or delay that must be positive was zero.
    #[error("{name} must be greater than zero")]
    ZeroDuration { name: &'static str },

    /// DOP threshold outside (0, 50].
    #[error("{name} must be within (0, 50], got {value}")]
    DopOutOfRange { name: &'static str, value: f64 },

    /// Reconnection attempt count below -1.
    #[error("maximum reconnection attempts must be -1 (unlimited) or >= 0, got {0}")]
    InvalidReconnectAttempts(i64),

    /// Device precision must be a positive finite distance.
    #[error("device precision must be a positive distance, got {0}")]
    InvalidDevicePrecision(f64),

    /// Notification capacity must be positive.
    #[error("notification capacity must be greater than zero")]
    ZeroCapacity,

    /// Failed to read the config file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    /// A value in the config file could not be parsed.
    #[error("invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Bound on consecutive reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectLimit {
    /// Keep trying forever.
    #[default]
    Unlimited,
    /// Give up after this many consecutive attempts.
    Attempts(u32),
}

impl ReconnectLimit {
    /// Whether another attempt is allowed after `consecutive` attempts.
    pub fn permits(&self, consecutive: u32) -> bool {
        match self {
            ReconnectLimit::Unlimited => true,
            ReconnectLimit::Attempts(max) => consecutive < *max,
        }
    }
}

impl TryFrom<i64> for ReconnectLimit {
    type Error = ConfigError;

    /// `-1` is unlimited; any other negative value is rejected.
    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(ReconnectLimit::Unlimited),
            v if v >= 0 => u32::try_from(v)
                .map(ReconnectLimit::Attempts)
                .map_err(|_| ConfigError::InvalidReconnectAttempts(v)),
            v => Err(ConfigError::InvalidReconnectAttempts(v)),
        }
    }
}

impl fmt::Display for ReconnectLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectLimit::Unlimited => write!(f, "unlimited"),
            ReconnectLimit::Attempts(n) => write!(f, "{}", n),
        }
    }
}

/// Configuration for an acquisition engine.
///
/// Fields are private; every setter validates and leaves the previous
/// value intact on error.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    command_timeout: Duration,
    read_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnection_attempts: ReconnectLimit,
    max_horizontal_dop: f64,
    max_vertical_dop: f64,
    device_precision: Distance,
    notification_capacity: usize,
    filter_enabled: bool,
    allow_automatic_reconnection: bool,
    fix_required: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnection_attempts: ReconnectLimit::Unlimited,
            max_horizontal_dop: WORST_DOP,
            max_vertical_dop: WORST_DOP,
            device_precision: Distance::meters(DEFAULT_DEVICE_PRECISION_METERS),
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            filter_enabled: true,
            allow_automatic_reconnection: true,
            fix_required: false,
        }
    }
}

impl EngineConfig {
    /// How long a lifecycle command waits for the command lock.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn set_command_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
        if timeout < MINIMUM_COMMAND_TIMEOUT {
            return Err(ConfigError::CommandTimeoutTooShort(timeout));
        }
        self.command_timeout = timeout;
        Ok(())
    }

    /// Bound on a single device read, handed to the device on open.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "read timeout",
            });
        }
        self.read_timeout = timeout;
        Ok(())
    }

    /// Backoff between reconnection attempts.
    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn set_reconnect_delay(&mut self, delay: Duration) -> Result<(), ConfigError> {
        if delay.is_zero() {
            return Err(ConfigError::ZeroDuration {
                name: "reconnect delay",
            });
        }
        self.reconnect_delay = delay;
        Ok(())
    }

    pub fn max_reconnection_attempts(&self) -> ReconnectLimit {
        self.max_reconnection_attempts
    }

    /// Set the attempt limit: `-1` for unlimited, otherwise a count >= 0.
    pub fn set_max_reconnection_attempts(&mut self, attempts: i64) -> Result<(), ConfigError> {
        self.max_reconnection_attempts = ReconnectLimit::try_from(attempts)?;
        Ok(())
    }

    pub fn max_horizontal_dop(&self) -> f64 {
        self.max_horizontal_dop
    }

    pub fn set_max_horizontal_dop(&mut self, value: f64) -> Result<(), ConfigError> {
        if !Dop::is_threshold(value) {
            return Err(ConfigError::DopOutOfRange {
                name: "maximum horizontal DOP",
                value,
            });
        }
        self.max_horizontal_dop = value;
        Ok(())
    }

    pub fn max_vertical_dop(&self) -> f64 {
        self.max_vertical_dop
    }

    pub fn set_max_vertical_dop(&mut self, value: f64) -> Result<(), ConfigError> {
        if !Dop::is_threshold(value) {
            return Err(ConfigError::DopOutOfRange {
                name: "maximum vertical DOP",
                value,
            });
        }
        self.max_vertical_dop = value;
        Ok(())
    }

    /// Average precision of the receiver, fed to the precision filter.
    pub fn device_precision(&self) -> Distance {
        self.device_precision
    }

    pub fn set_device_precision(&mut self, precision: Distance) -> Result<(), ConfigError> {
        let meters = precision.as_meters();
        if !meters.is_finite() || meters <= 0.0 {
            return Err(ConfigError::InvalidDevicePrecision(meters));
        }
        self.device_precision = precision;
        Ok(())
    }

    /// Events buffered per subscriber before the oldest are dropped.
    pub fn notification_capacity(&self) -> usize {
        self.notification_capacity
    }

    pub fn set_notification_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        self.notification_capacity = capacity;
        Ok(())
    }

    pub fn filter_enabled(&self) -> bool {
        self.filter_enabled
    }

    pub fn set_filter_enabled(&mut self, enabled: bool) {
        self.filter_enabled = enabled;
    }

    pub fn allow_automatic_reconnection(&self) -> bool {
        self.allow_automatic_reconnection
    }

    pub fn set_allow_automatic_reconnection(&mut self, allow: bool) {
        self.allow_automatic_reconnection = allow;
    }

    /// When set, measurements are unusable until the fix status is `Fix`.
    pub fn fix_required(&self) -> bool {
        self.fix_required
    }

    pub fn set_fix_required(&mut self, required: bool) {
        self.fix_required = required;
    }

    /// Whether the reconnection policy allows another attempt.
    pub fn permits_reconnection(&self, consecutive_attempts: u32) -> bool {
        self.allow_automatic_reconnection
            && self.max_reconnection_attempts.permits(consecutive_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert_eq!(config.read_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.max_reconnection_attempts(), ReconnectLimit::Unlimited);
        assert_eq!(config.max_horizontal_dop(), 50.0);
        assert_eq!(config.max_vertical_dop(), 50.0);
        assert!(config.filter_enabled());
        assert!(config.allow_automatic_reconnection());
        assert!(!config.fix_required());
    }

    #[test]
    fn test_command_timeout_minimum() {
        let mut config = EngineConfig::default();
        assert!(matches!(
            config.set_command_timeout(Duration::from_millis(999)),
            Err(ConfigError::CommandTimeoutTooShort(_))
        ));
        assert_eq!(config.command_timeout(), DEFAULT_COMMAND_TIMEOUT);

        config.set_command_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_read_timeout_must_be_positive() {
        let mut config = EngineConfig::default();
        assert!(config.set_read_timeout(Duration::ZERO).is_err());
        assert_eq!(config.read_timeout(), DEFAULT_READ_TIMEOUT);
        config.set_read_timeout(Duration::from_millis(1)).unwrap();
        assert_eq!(config.read_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn test_dop_threshold_saturation() {
        let mut config = EngineConfig::default();
        config.set_max_horizontal_dop(8.0).unwrap();

        assert!(config.set_max_horizontal_dop(0.0).is_err());
        assert!(config.set_max_horizontal_dop(50.5).is_err());
        assert!(config.set_max_horizontal_dop(f64::NAN).is_err());
        assert_eq!(config.max_horizontal_dop(), 8.0);

        assert!(config.set_max_vertical_dop(-1.0).is_err());
        assert_eq!(config.max_vertical_dop(), 50.0);
        config.set_max_vertical_dop(50.0).unwrap();
    }

    #[test]
    fn test_reconnect_limit_parsing() {
        assert_eq!(ReconnectLimit::try_from(-1).unwrap(), ReconnectLimit::Unlimited);
        assert_eq!(ReconnectLimit::try_from(0).unwrap(), ReconnectLimit::Attempts(0));
        assert_eq!(ReconnectLimit::try_from(3).unwrap(), ReconnectLimit::Attempts(3));
        assert!(ReconnectLimit::try_from(-2).is_err());

        let mut config = EngineConfig::default();
        config.set_max_reconnection_attempts(2).unwrap();
        assert!(config.set_max_reconnection_attempts(-5).is_err());
        assert_eq!(config.max_reconnection_attempts(), ReconnectLimit::Attempts(2));
    }

    #[test]
    fn test_permits_reconnection() {
        let mut config = EngineConfig::default();
        assert!(config.permits_reconnection(1_000_000));

        config.set_max_reconnection_attempts(2).unwrap();
        assert!(config.permits_reconnection(0));
        assert!(config.permits_reconnection(1));
        assert!(!config.permits_reconnection(2));

        config.set_allow_automatic_reconnection(false);
        assert!(!config.permits_reconnection(0));
    }

    #[test]
    fn test_device_precision_and_capacity() {
        let mut config = EngineConfig::default();
        assert!(config.set_device_precision(Distance::meters(0.0)).is_err());
        assert!(config.set_device_precision(Distance::INVALID).is_err());
        config.set_device_precision(Distance::meters(2.5)).unwrap();
        assert_eq!(config.device_precision().as_meters(), 2.5);

        assert!(matches!(
            config.set_notification_capacity(0),
            Err(ConfigError::ZeroCapacity)
        ));
        config.set_notification_capacity(16).unwrap();
        assert_eq!(config.notification_capacity(), 16);
    }
}
