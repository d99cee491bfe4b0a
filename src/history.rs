//! ==============================================================================
//! history.rs - parking history log and fire-and-forget forwarding
//! ==============================================================================
//!
//! purpose:
//!     every accepted distances write is also recorded as history. the write
//!     handler must answer the device right away, so it only drops the
//!     reading into a bounded queue; a background task drains the queue into
//!     the log.
//!
//! ```text
//!     ┌──────────────┐ try_send ┌─────────┐  recv   ┌───────────────────────┐
//!     │ POST /update │ ───────▶ │  queue  │ ──────▶ │ worker                │
//!     └──────────────┘          └─────────┘         │  ├─ local HistoryLog  │
//!                                                   │  └─ remote POST       │
//!                                                   └───────────────────────┘
//!
//!     a full queue drops the reading, a failed delivery is logged once and
//!     never retried. neither reaches the device.
//! ```
//!
//! relationships:
//!     - used by: server.rs (forwarding, /api/parking-history)
//!     - uses: occupancy.rs (per-point occupancy), clock.rs
//!
//! ==============================================================================

use crate::clock::Clock;
use crate::error::HistoryError;
use crate::occupancy::SpotBands;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_CAPACITY: usize = 1_000;
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_millis(2_000);
/// chart bucket width
pub const BUCKET_MS: u64 = 5 * 60 * 1_000;
const HOUR_MS: u64 = 60 * 60 * 1_000;

// ==============================================================================
// history log
// ==============================================================================

/// one channel reading at one point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPoint {
    pub timestamp_ms: u64,
    /// 1-based, slot 1 is sensor channel 0
    pub slot_id: usize,
    pub distance: Option<f64>,
    pub occupied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReading {
    pub slot_id: usize,
    pub distance: Option<f64>,
    pub occupied: bool,
}

/// latest reading of every slot inside one 5 minute window
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBucket {
    pub timestamp: u64,
    pub date: String,
    pub time: String,
    pub slots: Vec<SlotReading>,
    pub total_occupied: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub data: Vec<HistoryBucket>,
    pub total_points: usize,
    pub time_range: String,
    pub last_update: Option<u64>,
}

/// bounded in-memory history, oldest points evicted first
pub struct HistoryLog {
    points: Mutex<VecDeque<HistoryPoint>>,
    capacity: usize,
    bands: SpotBands,
    clock: Arc<dyn Clock>,
}

impl HistoryLog {
    pub fn new(capacity: usize, bands: SpotBands, clock: Arc<dyn Clock>) -> Self {
        Self {
            points: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
            bands,
            clock,
        }
    }

    /// record one point per channel, returns the number of points added
    pub fn record(&self, distances: &[Option<f64>]) -> usize {
        let now = self.clock.now_ms();
        let mut points = self.points.lock();
        for (channel, distance) in distances.iter().enumerate() {
            points.push_back(HistoryPoint {
                timestamp_ms: now,
                slot_id: channel + 1,
                distance: *distance,
                occupied: self.bands.is_occupied(channel, *distance),
            });
        }
        while points.len() > self.capacity {
            points.pop_front();
        }
        tracing::debug!(added = distances.len(), total = points.len(), "recorded parking history");
        distances.len()
    }

    pub fn len(&self) -> usize {
        self.points.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.lock().is_empty()
    }

    /// points from the last `hours`, optionally for one slot, in 5 minute buckets
    pub fn query(&self, hours: u64, slot_id: Option<usize>) -> HistoryQuery {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(hours.saturating_mul(HOUR_MS));
        let points = self.points.lock();

        let matching: Vec<&HistoryPoint> = points
            .iter()
            .filter(|p| p.timestamp_ms > cutoff)
            .filter(|p| slot_id.map_or(true, |slot| p.slot_id == slot))
            .collect();

        // points are stored oldest first, later inserts overwrite earlier ones
        let mut buckets: BTreeMap<u64, BTreeMap<usize, SlotReading>> = BTreeMap::new();
        for point in &matching {
            let key = point.timestamp_ms / BUCKET_MS * BUCKET_MS;
            buckets.entry(key).or_default().insert(
                point.slot_id,
                SlotReading {
                    slot_id: point.slot_id,
                    distance: point.distance,
                    occupied: point.occupied,
                },
            );
        }

        let data = buckets
            .into_iter()
            .map(|(timestamp, slots)| {
                let (date, time) = format_bucket(timestamp);
                let slots: Vec<SlotReading> = slots.into_values().collect();
                let total_occupied = slots.iter().filter(|s| s.occupied).count();
                HistoryBucket { timestamp, date, time, slots, total_occupied }
            })
            .collect();

        HistoryQuery {
            data,
            total_points: matching.len(),
            time_range: format!("{hours} hours"),
            last_update: points.back().map(|p| p.timestamp_ms),
        }
    }
}

fn format_bucket(timestamp_ms: u64) -> (String, String) {
    i64::try_from(timestamp_ms)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| (t.format("%Y-%m-%d").to_string(), t.format("%H:%M:%S").to_string()))
        .unwrap_or_default()
}

// ==============================================================================
// forwarding
// ==============================================================================

/// where queued readings end up
#[derive(Clone)]
pub enum HistoryTarget {
    Local(Arc<HistoryLog>),
    Remote { client: reqwest::Client, url: String },
}

impl HistoryTarget {
    /// remote target whose requests give up after `timeout`, so one silent
    /// peer cannot stall the worker
    pub fn remote(url: impl Into<String>, timeout: Duration) -> Result<Self, HistoryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::Remote { client, url: url.into() })
    }

    async fn deliver(&self, distances: &[Option<f64>]) -> Result<(), HistoryError> {
        match self {
            Self::Local(log) => {
                log.record(distances);
                Ok(())
            }
            Self::Remote { client, url } => {
                let response = client
                    .post(url)
                    .json(&serde_json::json!({ "distances": distances }))
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(HistoryError::Status(response.status()));
                }
                Ok(())
            }
        }
    }
}

/// handle held by the write path
#[derive(Clone, Debug, Default)]
pub struct HistoryForwarder {
    tx: Option<mpsc::Sender<Vec<Option<f64>>>>,
}

impl HistoryForwarder {
    /// start the worker; it stops once every forwarder clone is dropped
    pub fn spawn(target: HistoryTarget, queue_depth: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Vec<Option<f64>>>(queue_depth.max(1));
        let worker = tokio::spawn(async move {
            while let Some(distances) = rx.recv().await {
                if let Err(e) = target.deliver(&distances).await {
                    tracing::warn!(error = %e, "history save failed");
                }
            }
            tracing::debug!("history forwarder stopped");
        });
        (Self { tx: Some(tx) }, worker)
    }

    /// a forwarder that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// queue a reading without waiting, `false` if it was dropped
    pub fn forward(&self, distances: Vec<Option<f64>>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.try_send(distances) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("history queue full, reading dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("history worker gone, reading dropped");
                false
            }
        }
    }
}
