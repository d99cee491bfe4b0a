//! ==============================================================================
//! occupancy.rs - distance bands and spot classification
//! ==============================================================================
//!
//! purpose:
//!     turns an ultrasonic distance (cm) into a parking spot status.
//!     a car parked over the sensor reflects the echo inside a configured
//!     band; an empty spot reads either too close (ground clutter) or beyond
//!     the band. `None` means the channel is offline or the echo was lost.
//!
//! relationships:
//!     - used by: policy.rs (led defaults), history.rs (per-point occupancy),
//!       client.rs (aggregate counts), server.rs (/api/occupancy)
//!     - configured by: config.rs ([occupancy] section)
//!
//! ==============================================================================

use serde::Serialize;
use std::collections::BTreeMap;

/// lower bound of the default occupied band (cm)
pub const DEFAULT_MIN_CM: f64 = 20.0;
/// upper bound of the default occupied band (cm)
pub const DEFAULT_MAX_CM: f64 = 200.0;

/// inclusive `[min_cm, max_cm]` band in which a reading means "occupied"
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OccupancyBand {
    pub min_cm: f64,
    pub max_cm: f64,
}

impl Default for OccupancyBand {
    fn default() -> Self {
        Self { min_cm: DEFAULT_MIN_CM, max_cm: DEFAULT_MAX_CM }
    }
}

impl OccupancyBand {
    pub fn new(min_cm: f64, max_cm: f64) -> Self {
        Self { min_cm, max_cm }
    }

    pub fn contains(&self, distance_cm: f64) -> bool {
        distance_cm >= self.min_cm && distance_cm <= self.max_cm
    }

    /// classify a single channel reading
    pub fn classify(&self, distance_cm: Option<f64>) -> SpotStatus {
        match distance_cm {
            None => SpotStatus::Unknown,
            Some(d) if self.contains(d) => SpotStatus::Occupied,
            Some(_) => SpotStatus::Free,
        }
    }
}

/// what a single channel says about its parking spot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotStatus {
    Occupied,
    Free,
    Unknown,
}

/// per-channel bands, falling back to a default band for unconfigured channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpotBands {
    default: OccupancyBand,
    overrides: BTreeMap<usize, OccupancyBand>,
}

impl SpotBands {
    pub fn new(default: OccupancyBand) -> Self {
        Self { default, overrides: BTreeMap::new() }
    }

    /// builder-style override for one sensor channel
    pub fn with_spot(mut self, channel: usize, band: OccupancyBand) -> Self {
        self.overrides.insert(channel, band);
        self
    }

    pub fn band(&self, channel: usize) -> OccupancyBand {
        self.overrides.get(&channel).copied().unwrap_or(self.default)
    }

    pub fn classify(&self, channel: usize, distance_cm: Option<f64>) -> SpotStatus {
        self.band(channel).classify(distance_cm)
    }

    pub fn is_occupied(&self, channel: usize, distance_cm: Option<f64>) -> bool {
        self.classify(channel, distance_cm) == SpotStatus::Occupied
    }

    /// status of every channel in order
    pub fn classify_all(&self, distances: &[Option<f64>]) -> Vec<SpotStatus> {
        distances
            .iter()
            .enumerate()
            .map(|(i, d)| self.classify(i, *d))
            .collect()
    }
}

/// aggregate counts shown on the dashboard header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OccupancySummary {
    pub total: usize,
    pub occupied: usize,
    pub available: usize,
    pub inactive: usize,
}

impl OccupancySummary {
    pub fn from_distances(distances: &[Option<f64>], bands: &SpotBands) -> Self {
        let mut summary = Self { total: distances.len(), ..Self::default() };
        for status in bands.classify_all(distances) {
            match status {
                SpotStatus::Occupied => summary.occupied += 1,
                SpotStatus::Free => summary.available += 1,
                SpotStatus::Unknown => summary.inactive += 1,
            }
        }
        summary
    }
}
