//! Rate derivation from cumulative counters.

use std::time::Instant;

use crate::procfs::{IoCounters, RawCounters};

/// Basis for the next interval's deltas, one per tracked pid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrevSample {
    pub cpu_ticks: u64,
    pub timestamp: Instant,
    /// Last successfully read I/O counters. `None` until one succeeds.
    pub io: Option<IoSnapshot>,
}

/// I/O counters together with the instant they were read at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoSnapshot {
    pub counters: IoCounters,
    pub timestamp: Instant,
}

impl PrevSample {
    /// Build the basis for the next interval.
    ///
    /// Timestamp and CPU ticks always move to the current read. The I/O
    /// snapshot moves only when the current read produced one, otherwise the
    /// last successful snapshot (with its own read time) is retained so a
    /// transient io read failure does not skew the following rate.
    pub fn carry_forward(prev: Option<&PrevSample>, curr: &RawCounters, now: Instant) -> Self {
        let io = match curr.io {
            Some(counters) => Some(IoSnapshot {
                counters,
                timestamp: now,
            }),
            None => prev.and_then(|p| p.io),
        };

        Self {
            cpu_ticks: curr.cpu_ticks,
            timestamp: now,
            io,
        }
    }
}

/// Instantaneous rates derived for one interval. Absent when no rate can be
/// computed (first observation, non-positive elapsed time, missing I/O).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rates {
    /// Percent of one CPU core.
    pub cpu_pct: Option<f64>,
    pub disk_bps: Option<f64>,
    pub xfer_bps: Option<f64>,
}

/// Derive per-second rates between `prev` and `curr`.
///
/// Every rate is clamped at zero: a counter that went backwards yields 0,
/// never a negative rate.
pub fn compute(
    prev: Option<&PrevSample>,
    curr: &RawCounters,
    now: Instant,
    ticks_per_second: u64,
) -> Rates {
    let Some(prev) = prev else {
        return Rates::default();
    };

    // Instant subtraction saturates, so a clock anomaly shows up as zero.
    let dt = now.saturating_duration_since(prev.timestamp).as_secs_f64();
    if dt <= 0.0 {
        return Rates::default();
    }

    let ticks_per_second = ticks_per_second.max(1) as f64;
    let cpu_pct = delta(prev.cpu_ticks, curr.cpu_ticks) / ticks_per_second / dt * 100.0;

    let (disk_bps, xfer_bps) = match (prev.io, curr.io) {
        (Some(p), Some(c)) => {
            let io_dt = now.saturating_duration_since(p.timestamp).as_secs_f64();
            if io_dt > 0.0 {
                (
                    Some(delta(p.counters.disk_bytes, c.disk_bytes) / io_dt),
                    Some(delta(p.counters.transfer_bytes, c.transfer_bytes) / io_dt),
                )
            } else {
                (None, None)
            }
        }
        _ => (None, None),
    };

    Rates {
        cpu_pct: Some(cpu_pct),
        disk_bps,
        xfer_bps,
    }
}

/// Non-negative difference between two cumulative counter readings.
fn delta(prev: u64, curr: u64) -> f64 {
    curr.saturating_sub(prev) as f64
}
