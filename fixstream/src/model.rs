//! Decoded-state model - the most recently known positioning facts.
//!
//! One [`DecodedState`] lives inside each engine. The worker thread writes
//! it through the precision gate; callers read clones of it through
//! [`Engine::snapshot`](crate::engine::Engine::snapshot).
//!
//! Every field starts out invalid (`None` / `Unknown`) and is reset to
//! that state whenever the engine re-initializes for a new device.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::units::{
    Angle, Azimuth, Distance, Dop, FixMethod, FixMode, FixQuality, FixStatus, Position, Satellite,
    Speed,
};

/// Snapshot of the decoded positioning state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedState {
    pub position: Option<Position>,
    pub speed: Option<Speed>,
    pub bearing: Option<Azimuth>,
    pub altitude: Option<Distance>,
    pub altitude_above_ellipsoid: Option<Distance>,
    pub geoidal_separation: Option<Distance>,
    pub magnetic_variation: Option<Angle>,
    pub utc_date_time: Option<DateTime<Utc>>,

    pub fix_status: FixStatus,
    pub fix_mode: FixMode,
    pub fix_method: FixMethod,
    pub fix_quality: FixQuality,

    pub horizontal_dop: Option<Dop>,
    pub vertical_dop: Option<Dop>,
    pub mean_dop: Option<Dop>,

    /// Satellites in view, keyed by PRN.
    pub satellites: BTreeMap<u16, Satellite>,
    pub fixed_satellite_count: usize,
}

impl DecodedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every field to its invalid state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn has_fix(&self) -> bool {
        self.fix_status == FixStatus::Fix
    }

    /// Satellites in PRN order.
    pub fn satellites(&self) -> impl Iterator<Item = &Satellite> {
        self.satellites.values()
    }

    /// Merge satellites in view into the map.
    ///
    /// Known PRNs are updated in place (their `is_fixed` flag is kept), new
    /// PRNs are appended. Satellites absent from `incoming` are retained.
    /// Returns true if anything changed.
    pub fn merge_satellites(&mut self, incoming: &[Satellite]) -> bool {
        let mut changed = false;

        for satellite in incoming {
            match self.satellites.get_mut(&satellite.prn) {
                Some(existing) => {
                    let updated = Satellite {
                        is_fixed: existing.is_fixed,
                        ..*satellite
                    };
                    if !existing.same_reading(&updated) {
                        *existing = updated;
                        changed = true;
                    }
                }
                None => {
                    self.satellites.insert(satellite.prn, *satellite);
                    changed = true;
                }
            }
        }

        changed
    }

    /// Mark exactly the given PRNs as used in the fix.
    ///
    /// PRNs not yet in view are added with unknown geometry so the fixed
    /// count stays truthful. Returns true if any flag changed.
    pub fn mark_fixed(&mut self, prns: &[u16]) -> bool {
        let mut changed = false;

        for (prn, satellite) in self.satellites.iter_mut() {
            let fixed = prns.contains(prn);
            if satellite.is_fixed != fixed {
                satellite.is_fixed = fixed;
                changed = true;
            }
        }

        for &prn in prns {
            if prn == 0 {
                continue;
            }
            self.satellites.entry(prn).or_insert_with(|| {
                changed = true;
                Satellite {
                    is_fixed: true,
                    ..Satellite::new(prn, Azimuth::INVALID, f64::NAN, f64::NAN)
                }
            });
        }

        self.fixed_satellite_count = self.satellites.values().filter(|s| s.is_fixed).count();
        changed
    }

    /// Whether the horizontal and vertical DOP are within the configured
    /// maxima. Unknown DOP passes.
    pub fn within_precision(&self, config: &EngineConfig) -> bool {
        let hdop_ok = self
            .horizontal_dop
            .map_or(true, |d| d.value() <= config.max_horizontal_dop());
        let vdop_ok = self
            .vertical_dop
            .map_or(true, |d| d.value() <= config.max_vertical_dop());
        hdop_ok && vdop_ok
    }

    /// Whether consumers should act on position, speed and bearing.
    pub fn is_fix_usable(&self, config: &EngineConfig) -> bool {
        if config.fix_required() && !self.has_fix() {
            return false;
        }
        self.within_precision(config)
    }
}
