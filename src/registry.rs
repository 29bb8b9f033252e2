use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use crate::aggregate::{MetricAccumulator, Summary};
use crate::procfs::RawCounters;
use crate::rate::Rates;

/// Who a tracked process is. Name and parent are refreshed on every read;
/// pid and start time identify the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub name: String,
    pub parent_pid: u32,
    pub start_time: u64,
}

/// Most recent instantaneous values, for the live view.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CurrentValues {
    pub cpu_pct: f64,
    pub mem_bytes: f64,
    pub disk_bps: f64,
    pub xfer_bps: f64,
}

/// Accumulated state for one process over the session.
#[derive(Debug, Clone)]
pub struct ProcessStats {
    pub identity: ProcessIdentity,
    pub cpu: MetricAccumulator,
    pub mem: MetricAccumulator,
    pub disk: MetricAccumulator,
    pub xfer: MetricAccumulator,
    pub current: CurrentValues,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

impl ProcessStats {
    fn new(pid: u32, raw: &RawCounters, now: Instant) -> Self {
        Self {
            identity: ProcessIdentity {
                pid,
                name: raw.name.clone(),
                parent_pid: raw.parent_pid,
                start_time: raw.start_time,
            },
            cpu: MetricAccumulator::new(),
            mem: MetricAccumulator::new(),
            disk: MetricAccumulator::new(),
            xfer: MetricAccumulator::new(),
            current: CurrentValues::default(),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Fold one successful read and its derived rates into the record.
    fn update(&mut self, raw: &RawCounters, rates: &Rates, now: Instant) {
        let cpu_pct = rates.cpu_pct.map(clamp_rate);
        let disk_bps = rates.disk_bps.map(clamp_rate);
        let xfer_bps = rates.xfer_bps.map(clamp_rate);
        let mem_bytes = raw.rss_bytes as f64;

        self.identity.name.clone_from(&raw.name);
        self.identity.parent_pid = raw.parent_pid;

        self.current = CurrentValues {
            cpu_pct: cpu_pct.unwrap_or(0.0),
            mem_bytes,
            disk_bps: disk_bps.unwrap_or(0.0),
            xfer_bps: xfer_bps.unwrap_or(0.0),
        };

        self.cpu.add(cpu_pct);
        self.mem.add(Some(mem_bytes));
        self.disk.add(disk_bps);
        self.xfer.add(xfer_bps);

        self.last_seen = now;
    }

    fn report_row(&self) -> ReportRow {
        ReportRow {
            pid: self.identity.pid,
            name: self.identity.name.clone(),
            parent_pid: self.identity.parent_pid,
            cpu: self.cpu.summarize(),
            mem_bytes: self.mem.summarize(),
            disk_bps: self.disk.summarize(),
            xfer_bps: self.xfer.summarize(),
        }
    }

    fn live_row(&self) -> LiveRow {
        LiveRow {
            pid: self.identity.pid,
            name: self.identity.name.clone(),
            parent_pid: self.identity.parent_pid,
            current_cpu: self.current.cpu_pct,
            current_mem_bytes: self.current.mem_bytes,
            current_disk_bps: self.current.disk_bps,
            current_xfer_bps: self.current.xfer_bps,
        }
    }
}

fn clamp_rate(v: f64) -> f64 {
    v.max(0.0)
}

/// One row of the end-of-session report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub pid: u32,
    pub name: String,
    pub parent_pid: u32,
    pub cpu: Summary,
    pub mem_bytes: Summary,
    pub disk_bps: Summary,
    pub xfer_bps: Summary,
}

/// One row of the live view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRow {
    pub pid: u32,
    pub name: String,
    pub parent_pid: u32,
    pub current_cpu: f64,
    pub current_mem_bytes: f64,
    pub current_disk_bps: f64,
    pub current_xfer_bps: f64,
}

/// Maps pid to accumulated process state for the whole session.
///
/// Records are never dropped. When a pid is reused by a new process (its
/// start time changes) the old record is retired, still appears in the
/// final report, and a fresh record takes its place.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    active: HashMap<u32, ProcessStats>,
    retired: Vec<ProcessStats>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active record for `pid`, if any.
    pub fn get(&self, pid: u32) -> Option<&ProcessStats> {
        self.active.get(&pid)
    }

    /// Total records, active and retired.
    pub fn len(&self) -> usize {
        self.active.len() + self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records retired because their pid was reused.
    pub fn retired(&self) -> &[ProcessStats] {
        &self.retired
    }

    /// Whether `pid` is already tracked under a different process start time.
    pub fn is_reused(&self, pid: u32, start_time: u64) -> bool {
        self.active
            .get(&pid)
            .is_some_and(|rec| rec.identity.start_time != start_time)
    }

    /// Move the active record for `pid` to the retired list.
    pub fn retire(&mut self, pid: u32) {
        if let Some(rec) = self.active.remove(&pid) {
            debug!(pid, name = %rec.identity.name, "pid reused, retiring record");
            self.retired.push(rec);
        }
    }

    /// Create-or-update the record for `pid` from a successful read.
    pub fn record(&mut self, pid: u32, raw: &RawCounters, rates: &Rates, now: Instant) {
        self.active
            .entry(pid)
            .or_insert_with(|| {
                debug!(pid, name = %raw.name, "new process");
                ProcessStats::new(pid, raw, now)
            })
            .update(raw, rates, now);
    }

    /// Summaries for every record, ordered by ascending pid, then by when
    /// each record was first seen.
    pub fn final_report(&self) -> Vec<ReportRow> {
        let mut records: Vec<&ProcessStats> =
            self.active.values().chain(self.retired.iter()).collect();
        records.sort_by(|a, b| {
            a.identity
                .pid
                .cmp(&b.identity.pid)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        records.into_iter().map(ProcessStats::report_row).collect()
    }

    /// Current values for active records, ranked by CPU then memory,
    /// highest first.
    pub fn live_snapshot(&self) -> Vec<LiveRow> {
        let mut rows: Vec<LiveRow> = self.active.values().map(ProcessStats::live_row).collect();
        rows.sort_by(compare_live);
        rows
    }
}

// Pid breaks exact ties so the ranking is stable between passes.
fn compare_live(a: &LiveRow, b: &LiveRow) -> Ordering {
    b.current_cpu
        .total_cmp(&a.current_cpu)
        .then(b.current_mem_bytes.total_cmp(&a.current_mem_bytes))
        .then(a.pid.cmp(&b.pid))
}
