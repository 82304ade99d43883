//! fixstream - supervised positioning data acquisition.
//!
//! This library runs a long-lived background worker that reads packets of
//! positioning data from a device, decodes them through a pluggable
//! interpreter into a live model (position, velocity, precision, fix
//! status), smooths positions with a precision filter, and publishes change
//! notifications. The worker can be paused and resumed, shuts down within a
//! bounded time, and reconnects automatically after transport failures.
//!
//! # Modules
//!
//! - [`engine`] - the engine, its lifecycle and notification pipeline
//! - [`device`] - byte sources (files, FIFOs, TCP streams)
//! - [`filter`] - position smoothing
//! - [`model`] - the decoded state
//! - [`units`] - validated measurement carriers
//! - [`config`] - engine configuration and INI loading
//! - [`logging`] - tracing subscriber setup
//!
//! Sentence grammars are not part of this crate: implement
//! [`engine::Interpreter`] for the protocol your receiver speaks.

pub mod config;
pub mod device;
pub mod engine;
pub mod filter;
pub mod logging;
pub mod model;
pub mod units;

pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder, EngineError, EngineState, Notification};
