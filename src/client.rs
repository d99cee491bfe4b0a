//! ==============================================================================
//! client.rs - reconciliation client (monitor side)
//! ==============================================================================
//!
//! purpose:
//!     polls the relay's read contract and keeps a display-stable view of
//!     every channel. ultrasonic echoes drop out now and then, so a single
//!     null must not blank a spot that was showing a car a second ago. a
//!     channel that stays null longer than the hold window does go blank.
//!
//! rules per channel, on every poll:
//!     - non-null sample: shown immediately, hold clock restarts
//!     - null sample: previous value kept while the hold gate is open,
//!       otherwise cleared
//!     - fetch or decode failure: nothing changes
//!
//! a sample with `active = 0` means the relay itself judged every channel
//! stale. that clears the whole display and resets the hold clocks; the
//! hold-over only bridges nulls inside an active sample.
//!
//! hold gate:
//!     - per-channel (default): time since that channel last had a value
//!     - global: time since the last poll that carried any value. one busy
//!       channel keeps every other channel's stale value alive; kept for
//!       parity with older dashboards
//!
//! relationships:
//!     - talks to: server.rs over HTTP (GET /api/update), no shared memory
//!     - uses: occupancy.rs (aggregate counts)
//!     - used by: main.rs (monitor role)
//!
//! ==============================================================================

use crate::error::PollError;
use crate::occupancy::{OccupancySummary, SpotBands, SpotStatus};

use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_HOLD_WINDOW: Duration = Duration::from_millis(8_000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5_000);

// ==============================================================================
// poll payload
// ==============================================================================

/// the part of the read contract the monitor needs
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PollSample {
    #[serde(default)]
    pub distances: Vec<Option<f64>>,
    #[serde(default, deserialize_with = "flag")]
    pub active: bool,
}

/// accepts `true`/`false` as well as `1`/`0`
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0.0,
    })
}

// ==============================================================================
// reconciler
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HoldMode {
    #[default]
    PerChannel,
    Global,
}

/// display state for one monitor session
#[derive(Debug, Clone)]
pub struct Reconciler {
    hold_window: Duration,
    mode: HoldMode,
    bands: SpotBands,
    displayed: Vec<Option<f64>>,
    last_non_null_at: Vec<Option<Instant>>,
    /// last poll that carried at least one value (global gate)
    last_poll_at: Option<Instant>,
}

impl Reconciler {
    pub fn new(hold_window: Duration, mode: HoldMode, bands: SpotBands) -> Self {
        Self {
            hold_window,
            mode,
            bands,
            displayed: Vec::new(),
            last_non_null_at: Vec::new(),
            last_poll_at: None,
        }
    }

    /// merge a sample, returns whether the displayed values changed
    pub fn on_poll(&mut self, sample: &PollSample, now: Instant) -> bool {
        let before = self.displayed.clone();
        let channels = sample.distances.len();
        self.displayed.resize(channels, None);
        self.last_non_null_at.resize(channels, None);

        if !sample.active {
            self.displayed.fill(None);
            self.last_non_null_at.fill(None);
            self.last_poll_at = None;
            return self.displayed != before;
        }

        let global_open = self.gate_open(self.last_poll_at, now);

        for (i, reading) in sample.distances.iter().enumerate() {
            match reading {
                Some(d) => {
                    self.displayed[i] = Some(*d);
                    self.last_non_null_at[i] = Some(now);
                }
                None => {
                    let open = match self.mode {
                        HoldMode::PerChannel => self.gate_open(self.last_non_null_at[i], now),
                        HoldMode::Global => global_open,
                    };
                    if !(open && self.displayed[i].is_some()) {
                        self.displayed[i] = None;
                    }
                }
            }
        }

        if sample.distances.iter().any(Option::is_some) {
            self.last_poll_at = Some(now);
        }
        self.displayed != before
    }

    fn gate_open(&self, since: Option<Instant>, now: Instant) -> bool {
        since.is_some_and(|t| now.saturating_duration_since(t) < self.hold_window)
    }

    pub fn displayed(&self) -> &[Option<f64>] {
        &self.displayed
    }

    pub fn statuses(&self) -> Vec<SpotStatus> {
        self.bands.classify_all(&self.displayed)
    }

    /// counts from the displayed values, never the raw sample
    pub fn summary(&self) -> OccupancySummary {
        OccupancySummary::from_distances(&self.displayed, &self.bands)
    }
}

// ==============================================================================
// poller
// ==============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    /// last poll failed, display kept from before
    Error,
}

/// what a presentation layer renders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplaySnapshot {
    pub distances: Vec<Option<f64>>,
    pub statuses: Vec<SpotStatus>,
    pub summary: OccupancySummary,
    pub connection: ConnectionStatus,
    pub polls: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// base url of the relay, e.g. `http://localhost:3000`
    pub server_url: String,
    pub poll_interval: Duration,
    pub hold_window: Duration,
    pub hold_mode: HoldMode,
    pub bands: SpotBands,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            hold_window: DEFAULT_HOLD_WINDOW,
            hold_mode: HoldMode::default(),
            bands: SpotBands::default(),
        }
    }
}

pub struct StatePoller {
    client: reqwest::Client,
    url: String,
    interval: Duration,
    reconciler: Reconciler,
    snapshot: DisplaySnapshot,
    tx: watch::Sender<DisplaySnapshot>,
}

impl StatePoller {
    pub fn new(settings: MonitorSettings) -> Result<(Self, watch::Receiver<DisplaySnapshot>), PollError> {
        // a request may never outlive its poll slot
        let client = reqwest::Client::builder()
            .timeout(settings.poll_interval)
            .build()
            .map_err(PollError::Http)?;
        let (tx, rx) = watch::channel(DisplaySnapshot::default());
        let poller = Self {
            client,
            url: format!("{}/api/update", settings.server_url.trim_end_matches('/')),
            interval: settings.poll_interval,
            reconciler: Reconciler::new(settings.hold_window, settings.hold_mode, settings.bands),
            snapshot: DisplaySnapshot::default(),
            tx,
        };
        Ok((poller, rx))
    }

    pub async fn fetch(&self) -> Result<PollSample, PollError> {
        let response = self.client.get(&self.url).send().await.map_err(|e| self.classify(e))?;
        if !response.status().is_success() {
            return Err(PollError::Status(response.status()));
        }
        response.json::<PollSample>().await.map_err(|e| {
            if e.is_timeout() {
                self.classify(e)
            } else {
                PollError::Decode(e)
            }
        })
    }

    fn classify(&self, e: reqwest::Error) -> PollError {
        if e.is_timeout() {
            PollError::Timeout(u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX))
        } else {
            PollError::Http(e)
        }
    }

    /// one fetch-and-merge cycle; on error the display is left alone
    ///
    /// a result that arrives after every subscriber is gone is discarded.
    pub async fn poll_once(&mut self) -> Result<bool, PollError> {
        let result = self.fetch().await;
        self.snapshot.polls += 1;
        if self.tx.is_closed() {
            tracing::debug!("no subscribers left, discarding poll result");
            return result.map(|_| false);
        }
        match result {
            Ok(sample) => Ok(self.apply(&sample)),
            Err(e) => {
                tracing::warn!(error = %e, "poll failed, keeping displayed values");
                self.snapshot.connection = ConnectionStatus::Error;
                self.tx.send_replace(self.snapshot.clone());
                Err(e)
            }
        }
    }

    fn apply(&mut self, sample: &PollSample) -> bool {
        let changed = self.reconciler.on_poll(sample, Instant::now());
        self.snapshot.distances = self.reconciler.displayed().to_vec();
        self.snapshot.statuses = self.reconciler.statuses();
        self.snapshot.summary = self.reconciler.summary();
        self.snapshot.connection = if sample.active {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        };
        self.tx.send_replace(self.snapshot.clone());
        changed
    }

    pub fn snapshot(&self) -> &DisplaySnapshot {
        &self.snapshot
    }

    /// poll until `shutdown` flips to true or its sender is dropped
    ///
    /// an in-flight request is allowed to finish; its result is dropped when
    /// nobody is subscribed any more.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        tracing::info!(url = %self.url, interval_ms, "monitor polling started");

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }
            tokio::select! {
                // re-checked at the top of the loop
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            if let Ok(true) = self.poll_once().await {
                log_display(&self.snapshot);
            }
            if self.tx.is_closed() {
                break;
            }
        }
        tracing::info!("monitor polling stopped");
    }
}

fn log_display(snapshot: &DisplaySnapshot) {
    for (i, (distance, status)) in snapshot.distances.iter().zip(&snapshot.statuses).enumerate() {
        match distance {
            Some(d) => tracing::info!(slot = i + 1, distance_cm = d, status = ?status, "slot"),
            None => tracing::info!(slot = i + 1, status = ?status, "slot offline"),
        }
    }
    let s = snapshot.summary;
    tracing::info!(
        connection = ?snapshot.connection,
        total = s.total,
        occupied = s.occupied,
        available = s.available,
        inactive = s.inactive,
        "display updated"
    );
}

/// a running poll loop
pub struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn spawn(settings: MonitorSettings) -> Result<(Self, watch::Receiver<DisplaySnapshot>), PollError> {
        let (poller, display) = StatePoller::new(settings)?;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(shutdown_rx));
        Ok((Self { shutdown, task }, display))
    }

    /// stop scheduling polls and wait for the loop to exit
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "monitor task ended abnormally");
        }
    }
}
