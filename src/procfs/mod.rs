pub mod parse;

use std::path::PathBuf;

use tracing::debug;

pub use self::parse::{parse_io, parse_stat, IoCounters, ParseError, StatFields};

/// Default clock ticks per second when `sysconf` is unavailable.
pub const DEFAULT_TICKS_PER_SECOND: u64 = 100;

/// Default memory page size when `sysconf` is unavailable.
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Raw per-process counters captured by one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCounters {
    pub name: String,
    pub parent_pid: u32,
    /// Start time since boot, in clock ticks. Distinguishes a reused pid.
    pub start_time: u64,
    /// Cumulative utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    pub rss_bytes: u64,
    /// `None` when the io file could not be read (commonly EACCES for
    /// processes owned by another user).
    pub io: Option<IoCounters>,
}

/// Reads raw counters for a single process.
pub trait CounterReader {
    /// Returns `None` when the process is gone, inaccessible or its stat
    /// file is malformed. Never fails the caller.
    fn read(&self, pid: u32) -> Option<RawCounters>;
}

/// Platform constants resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConstants {
    pub ticks_per_second: u64,
    pub page_size: u64,
}

impl HostConstants {
    /// Query `_SC_CLK_TCK` and `_SC_PAGESIZE`, falling back to common
    /// defaults when sysconf reports an error.
    pub fn detect() -> Self {
        // Safety: sysconf has no preconditions and only reads process state.
        let clk_tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

        Self {
            ticks_per_second: positive_or(clk_tck, DEFAULT_TICKS_PER_SECOND),
            page_size: positive_or(page_size, DEFAULT_PAGE_SIZE),
        }
    }
}

impl Default for HostConstants {
    fn default() -> Self {
        Self {
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

fn positive_or(value: libc::c_long, fallback: u64) -> u64 {
    u64::try_from(value).ok().filter(|v| *v > 0).unwrap_or(fallback)
}

/// [`CounterReader`] backed by a procfs mount.
#[derive(Debug, Clone)]
pub struct ProcfsReader {
    root: PathBuf,
    page_size: u64,
}

impl ProcfsReader {
    /// Create a reader rooted at `root` (normally `/proc`).
    pub fn new(root: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            root: root.into(),
            page_size,
        }
    }

    fn read_stat(&self, pid: u32) -> Option<StatFields> {
        let path = self.root.join(pid.to_string()).join("stat");
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                debug!(pid, error = %e, "stat unreadable");
                return None;
            }
        };

        match parse_stat(&data) {
            Ok(stat) => Some(stat),
            Err(e) => {
                debug!(pid, error = %e, "stat malformed");
                None
            }
        }
    }

    fn read_io(&self, pid: u32) -> Option<IoCounters> {
        let path = self.root.join(pid.to_string()).join("io");
        let data = match std::fs::read_to_string(&path) {
            Ok(d) => d,
            Err(e) => {
                debug!(pid, error = %e, "io unreadable");
                return None;
            }
        };

        match parse_io(&data) {
            Ok(io) => Some(io),
            Err(e) => {
                debug!(pid, error = %e, "io malformed");
                None
            }
        }
    }
}

impl CounterReader for ProcfsReader {
    fn read(&self, pid: u32) -> Option<RawCounters> {
        let stat = self.read_stat(pid)?;
        let io = self.read_io(pid);

        Some(RawCounters {
            name: stat.name,
            parent_pid: stat.parent_pid,
            start_time: stat.start_time,
            cpu_ticks: stat.cpu_ticks,
            rss_bytes: stat.rss_pages.saturating_mul(self.page_size),
            io,
        })
    }
}
