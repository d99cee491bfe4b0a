//! ==============================================================================
//! store.rs - last known device state
//! ==============================================================================
//!
//! purpose:
//!     holds the single most recent report from the parking sensor device and
//!     answers reads with a freshness gate applied.
//!
//! two independent write paths:
//!     - sensor presence: a `distances` write replaces the array and resets
//!       the freshness clock (`received_at`)
//!     - actuator control: `ledN` writes overwrite single leds and never
//!       touch `distances` or `received_at`
//!
//! per channel, conceptually:
//!
//! ```text
//!     UNKNOWN ──first reading──▶ ACTIVE ──freshness lapses──▶ STALE_BUT_HELD
//!                                   ▲                               │
//!                                   └────────next distances write───┘
//!
//!     staleness lives only on the read path: stored values are kept and
//!     remain visible through `snapshot()`.
//! ```
//!
//! concurrency:
//!     one parking_lot mutex around the whole report. each operation locks
//!     once, so a reader never sees a half-written array and a distances
//!     write cannot lose a concurrent led write.
//!
//! relationships:
//!     - used by: server.rs (read/write contract, diagnostics)
//!     - uses: policy.rs (led defaults), clock.rs (wall clock)
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::domain::{DeviceReport, DeviceUpdate, StateView};
use crate::policy::ActuatorPolicy;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// freshness threshold observed in the current device firmware deployment
pub const DEFAULT_FRESHNESS: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub freshness: Duration,
    /// number of leds the state starts with
    pub actuator_count: usize,
    pub policy: ActuatorPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            freshness: DEFAULT_FRESHNESS,
            actuator_count: 2,
            policy: ActuatorPolicy::Manual,
        }
    }
}

pub struct DeviceStateStore {
    report: Mutex<DeviceReport>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl DeviceStateStore {
    pub fn new(settings: StoreSettings, clock: Arc<dyn Clock>) -> Self {
        let report = DeviceReport {
            actuators: vec![false; settings.actuator_count],
            ..DeviceReport::default()
        };
        Self { report: Mutex::new(report), settings, clock }
    }

    pub fn freshness(&self) -> Duration {
        self.settings.freshness
    }

    /// merge a partial write and return the resulting state, ungated
    pub fn apply_update(&self, update: &DeviceUpdate) -> StateView {
        let now = self.clock.now_ms();
        let mut report = self.report.lock();

        if let Some(distances) = &update.distances {
            report.distances.clone_from(distances);
            report.received_at_ms = now;
            for (index, on) in self.settings.policy.derive(distances) {
                set_actuator(&mut report.actuators, index, on);
            }
        }

        // explicit fields after the policy so a command in the same write wins
        for (&index, &on) in &update.actuators {
            set_actuator(&mut report.actuators, index, on);
        }

        let fresh = self.is_fresh_at(&report, now);
        StateView::new(
            report.distances.clone(),
            &report.actuators,
            fresh,
            report.received_at_ms,
            seconds_since(&report, now),
        )
    }

    /// current state with the freshness gate applied, never mutates
    pub fn read_current(&self) -> StateView {
        let now = self.clock.now_ms();
        let report = self.report.lock();

        let fresh = self.is_fresh_at(&report, now);
        let distances = if fresh {
            report.distances.clone()
        } else {
            vec![None; report.distances.len()]
        };
        StateView::new(
            distances,
            &report.actuators,
            fresh,
            report.received_at_ms,
            seconds_since(&report, now),
        )
    }

    /// raw copy of the stored report, including values hidden by staleness
    pub fn snapshot(&self) -> DeviceReport {
        self.report.lock().clone()
    }

    pub fn is_fresh(&self) -> bool {
        let now = self.clock.now_ms();
        let report = self.report.lock();
        self.is_fresh_at(&report, now)
    }

    fn is_fresh_at(&self, report: &DeviceReport, now: u64) -> bool {
        report.received_at_ms != 0
            && u128::from(now.saturating_sub(report.received_at_ms)) < self.settings.freshness.as_millis()
    }
}

fn seconds_since(report: &DeviceReport, now: u64) -> u64 {
    if report.received_at_ms == 0 {
        0
    } else {
        now.saturating_sub(report.received_at_ms) / 1_000
    }
}

/// grows the led array when a write names a led beyond its current length
fn set_actuator(actuators: &mut Vec<bool>, index: usize, on: bool) {
    if index >= actuators.len() {
        actuators.resize(index + 1, false);
    }
    actuators[index] = on;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::occupancy::SpotBands;

    const T0: u64 = 1_700_000_000_000;

    fn store_with(policy: ActuatorPolicy) -> (DeviceStateStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let settings = StoreSettings { policy, ..StoreSettings::default() };
        (DeviceStateStore::new(settings, clock.clone()), clock)
    }

    fn store() -> (DeviceStateStore, Arc<ManualClock>) {
        store_with(ActuatorPolicy::Manual)
    }

    #[test]
    fn empty_store_is_inactive() {
        let (store, _) = store();
        let view = store.read_current();
        assert!(view.distances.is_empty());
        assert!(!view.active);
        assert_eq!(view.timestamp, 0);
        assert_eq!(view.seconds_since_update, 0);
        assert_eq!(view.leds, vec![false, false]);
    }

    #[test]
    fn distances_write_reads_back_fresh() {
        let (store, clock) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(42.0), None, Some(310.5)]));
        clock.advance_ms(1_200);

        let view = store.read_current();
        assert!(view.active);
        assert_eq!(view.distances, vec![Some(42.0), None, Some(310.5)]);
        assert_eq!(view.timestamp, T0);
        assert_eq!(view.seconds_since_update, 1);
    }

    #[test]
    fn actuator_write_keeps_distances_and_timestamp() {
        let (store, clock) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(25.0)]));
        let before = store.read_current();

        clock.advance_ms(2_000);
        store.apply_update(&DeviceUpdate::default().led(1, true));

        let after = store.read_current();
        assert_eq!(after.distances, before.distances);
        assert_eq!(after.timestamp, before.timestamp);
        assert!(after.led(1));
        assert!(!after.led(2));
    }

    #[test]
    fn actuator_write_does_not_revive_stale_state() {
        let (store, clock) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(25.0)]));
        clock.advance_ms(6_000);
        store.apply_update(&DeviceUpdate::default().led(2, true));

        let view = store.read_current();
        assert!(!view.active);
        assert_eq!(view.distances, vec![None]);
    }

    #[test]
    fn stale_read_nulls_distances_but_keeps_stored_values() {
        let (store, clock) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(30.0), Some(40.0), None]));
        clock.advance_ms(5_000);

        let view = store.read_current();
        assert!(!view.active);
        assert_eq!(view.distances, vec![None, None, None]);
        assert!(view.seconds_since_update >= 5);
        assert_eq!(view.last_update, "Disconnected");

        assert_eq!(store.snapshot().distances, vec![Some(30.0), Some(40.0), None]);
    }

    #[test]
    fn freshness_boundary_is_exclusive() {
        let (store, clock) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(30.0)]));
        clock.advance_ms(4_999);
        assert!(store.is_fresh());
        clock.advance_ms(1);
        assert!(!store.is_fresh());
    }

    #[test]
    fn reapplying_same_write_is_idempotent() {
        let (store, clock) = store();
        let update = DeviceUpdate::distances(vec![Some(25.0), None]).led(2, true);
        store.apply_update(&update);
        let once = store.read_current();

        clock.advance_ms(10);
        store.apply_update(&update);
        let twice = store.read_current();

        assert_eq!(twice.distances, once.distances);
        assert_eq!(twice.leds, once.leds);
        assert_eq!(twice.active, once.active);
        assert_eq!(twice.timestamp, T0 + 10);
    }

    #[test]
    fn shorter_and_longer_writes_replace_the_array() {
        let (store, _) = store();
        store.apply_update(&DeviceUpdate::distances(vec![Some(1.0), Some(2.0), Some(3.0)]));
        store.apply_update(&DeviceUpdate::distances(vec![Some(9.0)]));
        assert_eq!(store.read_current().distances, vec![Some(9.0)]);
        store.apply_update(&DeviceUpdate::distances(vec![None; 6]));
        assert_eq!(store.read_current().distances.len(), 6);
    }

    #[test]
    fn led_beyond_configured_count_grows_the_array() {
        let (store, _) = store();
        let view = store.apply_update(&DeviceUpdate::default().led(4, true));
        assert_eq!(view.leds, vec![false, false, false, true]);
        assert_eq!(view.led_fields.get("led4"), Some(&1));
    }

    #[test]
    fn occupancy_policy_sets_leds_from_distances() {
        let (store, _) = store_with(ActuatorPolicy::OccupancyLeds(SpotBands::default()));
        let view = store.apply_update(&DeviceUpdate::distances(vec![Some(15.0), Some(25.0), None]));
        assert!(view.led(1));
        assert!(!view.led(2));

        let view = store.apply_update(&DeviceUpdate::distances(vec![Some(30.0), Some(25.0)]));
        assert!(view.led(1));
        assert!(view.led(2));
    }

    #[test]
    fn explicit_led_in_same_write_overrides_policy() {
        let (store, _) = store_with(ActuatorPolicy::OccupancyLeds(SpotBands::default()));
        let update = DeviceUpdate::distances(vec![Some(30.0), Some(25.0)]).led(2, false);
        let view = store.apply_update(&update);
        assert!(view.led(1));
        assert!(!view.led(2));
    }

    #[test]
    fn concurrent_led_and_distance_writes_do_not_lose_updates() {
        let (store, _) = store();
        let store = Arc::new(store);

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 2 == 0 {
                            store.apply_update(&DeviceUpdate::distances(vec![Some(f64::from(i)); 3]));
                        } else {
                            store.apply_update(&DeviceUpdate::default().led(2, true));
                        }
                        let view = store.read_current();
                        assert!(view.distances.is_empty() || view.distances.len() == 3);
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let view = store.read_current();
        assert!(view.led(2));
        assert_eq!(view.distances.len(), 3);
    }
}
