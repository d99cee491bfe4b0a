//! ==============================================================================
//! clock.rs - wall clock capability
//! ==============================================================================
//!
//! purpose:
//!     freshness is measured against wall-clock epoch milliseconds, the same
//!     unit the device contract reports in `timestamp`. the store asks a
//!     `Clock` for "now" instead of calling the system clock directly, so
//!     tests can move time forward without sleeping.
//!
//! relationships:
//!     - used by: store.rs (freshness, received_at), history.rs (cutoffs)
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

/// source of "now" in unix epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// the real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        // before-epoch clocks clamp to 0 ("never")
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// a clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: AtomicU64::new(start_ms) }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
