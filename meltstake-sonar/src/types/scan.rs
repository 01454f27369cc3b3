//! Scan types

use super::ping::{PingRecord, StepDirection};
use chrono::{DateTime, Utc};

/// Run index record type for a scan holding every expected ping
pub const RECORD_SCAN: &str = "scan";
/// Run index record type for a scan cut short by a stop or an abort
pub const RECORD_PARTIAL_SCAN: &str = "partial_scan";

/// Direction of the first sweep; every scan begins at the sector start
pub const FIRST_SWEEP: StepDirection = StepDirection::Clockwise;

/// Upper bound on the ping buffer reserved up front
const MAX_PREALLOCATED_PINGS: usize = 4096;

/// Sweep sequencing for one scan
///
/// Even sweeps step clockwise, odd sweeps counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepPlan {
    pub pings_per_sweep: usize,
    pub num_sweeps: usize,
}

impl SweepPlan {
    pub fn new(pings_per_sweep: usize, num_sweeps: usize) -> Self {
        Self {
            pings_per_sweep,
            num_sweeps,
        }
    }

    /// Pings in a complete scan
    pub fn total(&self) -> usize {
        self.pings_per_sweep.saturating_mul(self.num_sweeps)
    }

    /// Sweep number of the `n`th ping
    pub fn sweep_of(&self, n: usize) -> usize {
        n / self.pings_per_sweep.max(1)
    }

    /// Step direction for the `n`th ping
    pub fn direction_for(&self, n: usize) -> StepDirection {
        if self.sweep_of(n) % 2 == 0 {
            FIRST_SWEEP
        } else {
            FIRST_SWEEP.reversed()
        }
    }
}

/// One sweep cycle's worth of pings, persisted as a single `.dat` file
#[derive(Debug, Clone)]
pub struct Scan {
    index: u32,
    started_at: DateTime<Utc>,
    expected: usize,
    pings: Vec<PingRecord>,
}

impl Scan {
    /// Create an empty scan expecting `expected` pings
    pub fn new(index: u32, started_at: DateTime<Utc>, expected: usize) -> Self {
        Self {
            index,
            started_at,
            expected,
            pings: Vec::with_capacity(expected.min(MAX_PREALLOCATED_PINGS)),
        }
    }

    /// Append a ping in acquisition order
    pub fn push(&mut self, ping: PingRecord) {
        self.pings.push(ping);
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Pings a complete scan holds
    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn pings(&self) -> &[PingRecord] {
        &self.pings
    }

    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }

    /// True only when every expected ping was collected
    pub fn is_complete(&self) -> bool {
        self.pings.len() == self.expected
    }

    /// Run index record type
    pub fn record_type(&self) -> &'static str {
        if self.is_complete() {
            RECORD_SCAN
        } else {
            RECORD_PARTIAL_SCAN
        }
    }

    /// Data file name: `scan_<index>_<UTC start>.dat`
    pub fn file_name(&self) -> String {
        format!(
            "scan_{:04}_{}.dat",
            self.index,
            self.started_at.format("%Y-%m-%d_%H.%M.%S")
        )
    }
}
