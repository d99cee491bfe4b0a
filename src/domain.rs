use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// last known state reported by the sensing device
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    /// one reading per ultrasonic channel in cm, `None` = no echo / offline
    pub distances: Vec<Option<f64>>,
    /// indicator outputs, index 0 is `led1`
    pub actuators: Vec<bool>,
    /// unix timestamp (ms) of last accepted distances write, 0 = never
    pub received_at_ms: u64,
}

/// a partial write decoded from a request body
///
/// every field is optional. a field of the wrong shape is dropped on its
/// own and recorded in `ignored`; the rest of the write still applies.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceUpdate {
    pub distances: Option<Vec<Option<f64>>>,
    /// 0-based actuator index -> requested state
    pub actuators: BTreeMap<usize, bool>,
    pub ignored: Vec<String>,
}

impl DeviceUpdate {
    /// lenient decode of an already-parsed json body
    ///
    /// - `distances` must be an array; non-numeric elements become `None`
    /// - `ledN` (N >= 1) accepts booleans or numbers (non-zero = on)
    /// - anything else is ignored
    pub fn from_json(body: &Value) -> Self {
        let mut update = Self::default();
        let Some(fields) = body.as_object() else {
            update.ignored.push("<body is not an object>".to_string());
            return update;
        };

        for (key, value) in fields {
            if key == "distances" {
                match value.as_array() {
                    Some(items) => {
                        update.distances = Some(items.iter().map(Value::as_f64).collect());
                    }
                    None => update.ignored.push(key.clone()),
                }
            } else if let Some(index) = led_index(key) {
                match led_value(value) {
                    Some(on) => {
                        update.actuators.insert(index, on);
                    }
                    None => update.ignored.push(key.clone()),
                }
            }
        }
        update
    }

    pub fn distances(distances: Vec<Option<f64>>) -> Self {
        Self { distances: Some(distances), ..Self::default() }
    }

    /// builder for an actuator-only write, `led` is 1-based like the wire field
    pub fn led(mut self, led: usize, on: bool) -> Self {
        if led >= 1 {
            self.actuators.insert(led - 1, on);
        }
        self
    }

    /// the same update with the distances dropped
    pub fn actuators_only(&self) -> Self {
        Self { distances: None, actuators: self.actuators.clone(), ignored: self.ignored.clone() }
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_none() && self.actuators.is_empty()
    }
}

/// "led1" -> 0, "led12" -> 11
fn led_index(key: &str) -> Option<usize> {
    let n: usize = key.strip_prefix("led")?.parse().ok()?;
    n.checked_sub(1)
}

fn led_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    }
}

/// the read contract served to dashboards and the monitor
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub distances: Vec<Option<f64>>,
    /// `led1`, `led2`, ... as 0/1
    #[serde(flatten)]
    pub led_fields: BTreeMap<String, u8>,
    pub leds: Vec<bool>,
    #[serde(serialize_with = "as_flag")]
    pub active: bool,
    /// unix timestamp (ms) of last accepted distances write
    pub timestamp: u64,
    pub last_update: &'static str,
    pub seconds_since_update: u64,
}

impl StateView {
    pub fn new(distances: Vec<Option<f64>>, leds: &[bool], active: bool, timestamp: u64, seconds_since_update: u64) -> Self {
        let led_fields = leds
            .iter()
            .enumerate()
            .map(|(i, on)| (format!("led{}", i + 1), u8::from(*on)))
            .collect();
        Self {
            distances,
            led_fields,
            leds: leds.to_vec(),
            active,
            timestamp,
            last_update: if active { "Connected" } else { "Disconnected" },
            seconds_since_update,
        }
    }

    /// state of a 1-based led, `false` if the device has fewer
    pub fn led(&self, led: usize) -> bool {
        led.checked_sub(1)
            .and_then(|i| self.leds.get(i).copied())
            .unwrap_or(false)
    }
}

fn as_flag<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*flag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_distances_with_gaps() {
        let update = DeviceUpdate::from_json(&json!({ "distances": [15, 25.5, null, "x"] }));
        assert_eq!(update.distances, Some(vec![Some(15.0), Some(25.5), None, None]));
        assert!(update.actuators.is_empty());
        assert!(update.ignored.is_empty());
    }

    #[test]
    fn non_array_distances_are_ignored_but_leds_apply() {
        let update = DeviceUpdate::from_json(&json!({ "distances": "15,25", "led1": 1, "led2": false }));
        assert_eq!(update.distances, None);
        assert_eq!(update.actuators.get(&0), Some(&true));
        assert_eq!(update.actuators.get(&1), Some(&false));
        assert_eq!(update.ignored, vec!["distances".to_string()]);
    }

    #[test]
    fn malformed_led_values_are_ignored() {
        let update = DeviceUpdate::from_json(&json!({ "led1": "on", "led0": 1, "ledx": 1, "led3": 0 }));
        assert_eq!(update.actuators.len(), 1);
        assert_eq!(update.actuators.get(&2), Some(&false));
        assert_eq!(update.ignored, vec!["led1".to_string()]);
    }

    #[test]
    fn non_object_body_is_an_empty_update() {
        let update = DeviceUpdate::from_json(&json!([1, 2, 3]));
        assert!(update.is_empty());
    }

    #[test]
    fn view_serializes_wire_shape() {
        let view = StateView::new(vec![Some(25.0), None], &[true, false], true, 1_700_000_000_000, 2);
        let value = serde_json::to_value(&view).unwrap();
        assert_eq!(
            value,
            json!({
                "distances": [25.0, null],
                "led1": 1,
                "led2": 0,
                "leds": [true, false],
                "active": 1,
                "timestamp": 1_700_000_000_000u64,
                "lastUpdate": "Connected",
                "secondsSinceUpdate": 2
            })
        );
    }
}
