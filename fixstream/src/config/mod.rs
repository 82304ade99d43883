//! Engine configuration.
//!
//! [`EngineConfig`] carries every tunable of an acquisition engine. Values
//! are validated at the point of assignment: a rejected value returns a
//! [`ConfigError`] and the previous value stays in place.
//!
//! Configuration can also be loaded from `~/.fixstream/config.ini`:
//!
//! ```ini
//! [engine]
//! command_timeout_secs = 5
//! read_timeout_secs = 5
//! notification_capacity = 256
//!
//! [reconnect]
//! enabled = true
//! max_attempts = -1
//! delay_ms = 1000
//!
//! [precision]
//! filter_enabled = true
//! fix_required = false
//! max_hdop = 50
//! max_vdop = 50
//! device_precision_m = 6
//! ```
//!
//! # Example
//!
//! ```
//! use fixstream::config::EngineConfig;
//! use std::time::Duration;
//!
//! let mut config = EngineConfig::default();
//! config.set_command_timeout(Duration::from_secs(2)).unwrap();
//!
//! // Rejected values leave the configuration untouched
//! assert!(config.set_max_horizontal_dop(0.0).is_err());
//! assert_eq!(config.max_horizontal_dop(), 50.0);
//! ```

mod engine;
mod file;

pub use engine::{
    ConfigError, EngineConfig, ReconnectLimit, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_DEVICE_PRECISION_METERS, DEFAULT_NOTIFICATION_CAPACITY, DEFAULT_READ_TIMEOUT,
    DEFAULT_RECONNECT_DELAY, MINIMUM_COMMAND_TIMEOUT,
};
pub use file::{config_directory, config_file_path};
