//! parking-relay: live device state relay for an ESP32 ultrasonic
//! parking-occupancy monitor.
//!
//! the relay side (`store`, `server`, `history`) accepts distance and led
//! writes from the device and serves a freshness-gated view of them; the
//! monitor side (`client`) polls that view and smooths over momentary
//! sensor dropouts.

pub mod client;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod history;
pub mod occupancy;
pub mod policy;
pub mod server;
pub mod store;

pub use client::{PollerHandle, Reconciler, StatePoller};
pub use config::RelayConfig;
pub use domain::{DeviceReport, DeviceUpdate, StateView};
pub use store::DeviceStateStore;
