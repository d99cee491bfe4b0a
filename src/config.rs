//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `relay.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - role: "relay" serves the device contract, "monitor" polls a relay.
//!     - ServerConfig: where the relay listens.
//!     - FreshnessConfig: how long a distances write counts as live.
//!     - LedConfig: led count and the policy that drives them.
//!     - OccupancyConfig: default band and per-sensor overrides.
//!     - HistoryConfig: local ring size or remote forward target.
//!     - MonitorConfig: poll target, interval and hold window.
//!     - LoggingConfig: log level and sensor data echo.
//!
//! every section is optional; a missing field takes its default.
//!
//! ==============================================================================

use crate::client::{HoldMode, MonitorSettings};
use crate::occupancy::{OccupancyBand, SpotBands, DEFAULT_MAX_CM, DEFAULT_MIN_CM};
use crate::policy::{ActuatorPolicy, LedPolicyKind};
use crate::store::StoreSettings;

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PARKING_RELAY_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub role: Role,
    pub server: ServerConfig,
    pub freshness: FreshnessConfig,
    pub leds: LedConfig,
    pub occupancy: OccupancyConfig,
    pub history: HistoryConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Relay,
    Monitor,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FreshnessConfig {
    pub threshold_ms: u64,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self { threshold_ms: 5_000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LedConfig {
    pub count: usize,
    pub policy: LedPolicyKind,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self { count: 2, policy: LedPolicyKind::Occupancy }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OccupancyConfig {
    pub default_min_cm: f64,
    pub default_max_cm: f64,
    pub spots: Vec<SpotConfig>,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            default_min_cm: DEFAULT_MIN_CM,
            default_max_cm: DEFAULT_MAX_CM,
            spots: Vec::new(),
        }
    }
}

/// band override for one sensor channel (0-based `sensor_id`)
#[derive(Debug, Deserialize, Clone)]
pub struct SpotConfig {
    pub sensor_id: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_min_cm")]
    pub min_cm: f64,
    #[serde(default = "default_max_cm")]
    pub max_cm: f64,
}

impl SpotConfig {
    /// display name, falling back to the 1-based slot number
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("slot {}", self.sensor_id + 1))
    }
}

fn default_min_cm() -> f64 {
    DEFAULT_MIN_CM
}

fn default_max_cm() -> f64 {
    DEFAULT_MAX_CM
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub capacity: usize,
    /// when set, readings are POSTed here instead of kept in memory
    pub forward_url: Option<String>,
    pub queue_depth: usize,
    /// per-request limit for the remote log
    pub timeout_ms: u64,
}

impl HistoryConfig {
    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: crate::history::DEFAULT_CAPACITY,
            forward_url: None,
            queue_depth: 64,
            timeout_ms: u64::try_from(crate::history::DEFAULT_FORWARD_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub server_url: String,
    pub poll_interval_ms: u64,
    pub hold_window_ms: u64,
    pub hold_mode: HoldMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".to_string(),
            poll_interval_ms: 5_000,
            hold_window_ms: 8_000,
            hold_mode: HoldMode::PerChannel,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl RelayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: RelayConfig = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// `$PARKING_RELAY_CONFIG` must load if set; the well-known paths are
    /// tried quietly.
    pub fn load_or_default() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let config = Self::load(&path)?;
            tracing::info!(path = %path, "configuration loaded");
            return Ok(config);
        }

        let paths = [
            PathBuf::from("config").join("relay.toml"),
            PathBuf::from("..").join("config").join("relay.toml"),
        ];
        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "configuration loaded");
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "failed to load configuration");
                    }
                }
            }
        }

        tracing::warn!("no config file found - using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.freshness.threshold_ms == 0 {
            bail!("freshness.threshold_ms must be greater than zero");
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be greater than zero");
        }
        if self.history.enabled && self.history.capacity == 0 {
            bail!("history.capacity must be greater than zero");
        }
        if self.history.enabled && self.history.forward_url.is_some() && self.history.timeout_ms == 0 {
            bail!("history.timeout_ms must be greater than zero");
        }
        check_band("occupancy", self.occupancy.default_min_cm, self.occupancy.default_max_cm)?;
        for spot in &self.occupancy.spots {
            check_band(
                &format!("occupancy.spots[{}] ({})", spot.sensor_id, spot.label()),
                spot.min_cm,
                spot.max_cm,
            )?;
        }
        Ok(())
    }

    pub fn spot_bands(&self) -> SpotBands {
        let default = OccupancyBand::new(self.occupancy.default_min_cm, self.occupancy.default_max_cm);
        self.occupancy
            .spots
            .iter()
            .fold(SpotBands::new(default), |bands, spot| {
                bands.with_spot(spot.sensor_id, OccupancyBand::new(spot.min_cm, spot.max_cm))
            })
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            freshness: Duration::from_millis(self.freshness.threshold_ms),
            actuator_count: self.leds.count,
            policy: ActuatorPolicy::from_kind(self.leds.policy, self.spot_bands()),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            server_url: self.monitor.server_url.clone(),
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            hold_window: Duration::from_millis(self.monitor.hold_window_ms),
            hold_mode: self.monitor.hold_mode,
            bands: self.spot_bands(),
        }
    }

    /// Log configuration summary
    pub fn log_summary(&self) {
        tracing::info!(
            role = ?self.role,
            bind_addr = %self.server.bind_addr,
            freshness_ms = self.freshness.threshold_ms,
            leds = self.leds.count,
            led_policy = ?self.leds.policy,
            band_cm = %format!("[{}, {}]", self.occupancy.default_min_cm, self.occupancy.default_max_cm),
            spot_overrides = self.occupancy.spots.len(),
            "relay configuration"
        );
        for spot in &self.occupancy.spots {
            tracing::info!(
                sensor_id = spot.sensor_id,
                spot = %spot.label(),
                band_cm = %format!("[{}, {}]", spot.min_cm, spot.max_cm),
                "spot band override"
            );
        }
        if self.freshness.threshold_ms != 5_000 {
            tracing::info!(threshold_ms = self.freshness.threshold_ms, "non-default freshness threshold in effect");
        }
        match (&self.history.forward_url, self.history.enabled) {
            (_, false) => tracing::info!("history: disabled"),
            (Some(url), true) => tracing::info!(forward_url = %url, timeout_ms = self.history.timeout_ms, "history: forwarding to remote log"),
            (None, true) => tracing::info!(capacity = self.history.capacity, "history: in-memory log"),
        }
        if self.role == Role::Monitor {
            tracing::info!(
                server_url = %self.monitor.server_url,
                poll_interval_ms = self.monitor.poll_interval_ms,
                hold_window_ms = self.monitor.hold_window_ms,
                hold_mode = ?self.monitor.hold_mode,
                "monitor settings"
            );
        }
    }
}

fn check_band(what: &str, min_cm: f64, max_cm: f64) -> anyhow::Result<()> {
    if !(min_cm.is_finite() && max_cm.is_finite()) || min_cm < 0.0 || min_cm > max_cm {
        bail!("{what}: invalid band [{min_cm}, {max_cm}]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = RelayConfig::from_toml("").unwrap();
        assert_eq!(config.role, Role::Relay);
        assert_eq!(config.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.freshness.threshold_ms, 5_000);
        assert_eq!(config.leds.count, 2);
        assert_eq!(config.monitor.hold_window_ms, 8_000);
        assert!(config.history.enabled);
        assert_eq!(config.spot_bands(), SpotBands::default());
    }

    #[test]
    fn full_file_parses() {
        let config = RelayConfig::from_toml(
            r#"
            role = "monitor"

            [freshness]
            threshold_ms = 15000

            [leds]
            count = 3
            policy = "manual"

            [occupancy]
            default_min_cm = 10.0
            default_max_cm = 150.0

            [[occupancy.spots]]
            sensor_id = 2
            name = "A3"
            min_cm = 30.0
            max_cm = 90.0

            [history]
            forward_url = "http://history.local/api/parking-history"

            [monitor]
            server_url = "http://relay.local:3000"
            poll_interval_ms = 2000
            hold_mode = "global"
            "#,
        )
        .unwrap();

        assert_eq!(config.role, Role::Monitor);
        assert_eq!(config.store_settings().freshness, Duration::from_secs(15));
        assert_eq!(config.store_settings().policy, ActuatorPolicy::Manual);
        assert_eq!(config.leds.count, 3);

        let bands = config.spot_bands();
        assert_eq!(bands.band(0), OccupancyBand::new(10.0, 150.0));
        assert_eq!(bands.band(2), OccupancyBand::new(30.0, 90.0));

        let monitor = config.monitor_settings();
        assert_eq!(monitor.poll_interval, Duration::from_secs(2));
        assert_eq!(monitor.hold_window, Duration::from_secs(8));
        assert_eq!(monitor.hold_mode, HoldMode::Global);
        assert_eq!(
            config.history.forward_url.as_deref(),
            Some("http://history.local/api/parking-history")
        );
    }

    #[test]
    fn inverted_band_is_rejected() {
        let err = RelayConfig::from_toml(
            r#"
            [[occupancy.spots]]
            sensor_id = 0
            min_cm = 200.0
            max_cm = 20.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("occupancy.spots[0] (slot 1)"));
    }

    #[test]
    fn spot_name_labels_band_errors() {
        let err = RelayConfig::from_toml(
            r#"
            [[occupancy.spots]]
            sensor_id = 1
            name = "B2"
            min_cm = 90.0
            max_cm = 30.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("occupancy.spots[1] (B2)"));
    }

    #[test]
    fn history_timeout_defaults_and_overrides() {
        let config = RelayConfig::from_toml("").unwrap();
        assert_eq!(config.history.forward_timeout(), Duration::from_secs(2));

        let config = RelayConfig::from_toml(
            "[history]\nforward_url = \"http://history.local/api/parking-history\"\ntimeout_ms = 500",
        )
        .unwrap();
        assert_eq!(config.history.forward_timeout(), Duration::from_millis(500));

        assert!(RelayConfig::from_toml(
            "[history]\nforward_url = \"http://history.local/api/parking-history\"\ntimeout_ms = 0",
        )
        .is_err());
    }

    #[test]
    fn zero_freshness_is_rejected() {
        assert!(RelayConfig::from_toml("[freshness]\nthreshold_ms = 0").is_err());
    }

    #[test]
    fn unknown_role_is_a_parse_error() {
        assert!(RelayConfig::from_toml("role = \"spoke\"").is_err());
    }
}
