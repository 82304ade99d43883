//! Reconnection policy.
//!
//! After a transport failure the worker asks the policy whether to try
//! again. The consecutive-attempt counter is shared with the engine so
//! callers can observe it; it resets the moment a device opens.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::EngineConfig;

/// What the worker should do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectDecision {
    /// Sleep `delay`, then make attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Give up and let the engine settle in `Stopped`.
    GiveUp,
}

/// Consecutive reconnection attempts since the last successful open.
#[derive(Debug, Default)]
pub(crate) struct ReconnectCounter(AtomicU32);

impl ReconnectCounter {
    pub(crate) fn consecutive(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn record_attempt(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// Decide the next step given the current configuration.
    pub(crate) fn decide(&self, config: &EngineConfig) -> ReconnectDecision {
        let consecutive = self.consecutive();
        if config.permits_reconnection(consecutive) {
            ReconnectDecision::Retry {
                attempt: consecutive + 1,
                delay: config.reconnect_delay(),
            }
        } else {
            ReconnectDecision::GiveUp
        }
    }
}
