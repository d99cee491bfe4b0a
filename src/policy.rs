//! ==============================================================================
//! policy.rs - actuator defaults derived from distance writes
//! ==============================================================================
//!
//! purpose:
//!     when the device posts fresh distances, the relay can light the
//!     indicator leds on its own:
//!     - led1: at least one spot occupied
//!     - led2: more than one spot occupied
//!
//! ```text
//!     the policy only proposes values. the store applies them first and then
//!     applies any explicit `ledN` fields from the same write, so a dashboard
//!     command always wins.
//! ```
//!
//! relationships:
//!     - used by: store.rs (distance write path)
//!     - uses: occupancy.rs (bands)
//!
//! ==============================================================================

use crate::occupancy::SpotBands;
use serde::Deserialize;

/// configuration-facing selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedPolicyKind {
    #[default]
    Occupancy,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorPolicy {
    /// led1 = any occupied, led2 = several occupied
    OccupancyLeds(SpotBands),
    /// leds only change on explicit writes
    Manual,
}

impl ActuatorPolicy {
    pub fn from_kind(kind: LedPolicyKind, bands: SpotBands) -> Self {
        match kind {
            LedPolicyKind::Occupancy => Self::OccupancyLeds(bands),
            LedPolicyKind::Manual => Self::Manual,
        }
    }

    /// (0-based actuator index, state) pairs to apply for these distances
    pub fn derive(&self, distances: &[Option<f64>]) -> Vec<(usize, bool)> {
        match self {
            Self::OccupancyLeds(bands) => {
                let occupied = distances
                    .iter()
                    .enumerate()
                    .filter(|(i, d)| bands.is_occupied(*i, **d))
                    .count();
                vec![(0, occupied > 0), (1, occupied > 1)]
            }
            Self::Manual => Vec::new(),
        }
    }
}
