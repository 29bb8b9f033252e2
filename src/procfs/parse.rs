//! Parsers for `/proc/<pid>/stat` and `/proc/<pid>/io`.
//!
//! Both parsers work on the full file contents and never touch the
//! filesystem, so fixtures can be fed to them directly.

use thiserror::Error;

/// Number of whitespace-separated fields required after the `(comm)` field.
/// The last one consumed is rss (field 24 of `stat`).
const STAT_TAIL_FIELDS: usize = 22;

// Indices into the fields that follow the closing parenthesis. Field 3
// (state) is index 0.
const PPID_IDX: usize = 1;
const UTIME_IDX: usize = 11;
const STIME_IDX: usize = 12;
const STARTTIME_IDX: usize = 19;
const RSS_IDX: usize = 21;

/// Errors that can occur while parsing procfs counter files.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("stat: missing parenthesised process name")]
    MissingName,

    #[error("stat: expected at least {expected} fields after name, got {got}")]
    TooFewFields { expected: usize, got: usize },

    #[error("{file}: invalid integer in {field}: {raw:?}")]
    InvalidInteger {
        file: &'static str,
        field: &'static str,
        raw: String,
    },

    #[error("io: missing {field} line")]
    MissingIoField { field: &'static str },
}

/// Fields extracted from `/proc/<pid>/stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub name: String,
    pub parent_pid: u32,
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
    /// Process start time since boot, in clock ticks.
    pub start_time: u64,
    pub rss_pages: u64,
}

/// Cumulative I/O byte counters from `/proc/<pid>/io`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoCounters {
    /// read_bytes + write_bytes (storage layer).
    pub disk_bytes: u64,
    /// rchar + wchar (every read/write syscall, cached or not).
    pub transfer_bytes: u64,
}

/// Parse the contents of `/proc/<pid>/stat`.
///
/// The process name sits between the first `(` and the *last* `)`, since
/// the name itself may contain parentheses and whitespace.
pub fn parse_stat(raw: &str) -> Result<StatFields, ParseError> {
    let raw = raw.trim();

    let lpar = raw.find('(').ok_or(ParseError::MissingName)?;
    let rpar = raw.rfind(')').ok_or(ParseError::MissingName)?;
    if rpar <= lpar {
        return Err(ParseError::MissingName);
    }

    let name = &raw[lpar + 1..rpar];
    let tail: Vec<&str> = raw[rpar + 1..].split_whitespace().collect();
    if tail.len() < STAT_TAIL_FIELDS {
        return Err(ParseError::TooFewFields {
            expected: STAT_TAIL_FIELDS,
            got: tail.len(),
        });
    }

    let utime: u64 = stat_field(&tail, UTIME_IDX, "utime")?;
    let stime: u64 = stat_field(&tail, STIME_IDX, "stime")?;

    Ok(StatFields {
        name: name.to_string(),
        parent_pid: stat_field(&tail, PPID_IDX, "ppid")?,
        cpu_ticks: utime.saturating_add(stime),
        start_time: stat_field(&tail, STARTTIME_IDX, "starttime")?,
        rss_pages: stat_field(&tail, RSS_IDX, "rss")?,
    })
}

fn stat_field<T: std::str::FromStr>(
    tail: &[&str],
    idx: usize,
    field: &'static str,
) -> Result<T, ParseError> {
    let raw = tail.get(idx).copied().unwrap_or_default();
    raw.parse().map_err(|_| ParseError::InvalidInteger {
        file: "stat",
        field,
        raw: raw.to_string(),
    })
}

/// Parse the contents of `/proc/<pid>/io`.
///
/// All four of `rchar`, `wchar`, `read_bytes` and `write_bytes` must be
/// present; other lines are ignored.
pub fn parse_io(raw: &str) -> Result<IoCounters, ParseError> {
    let mut rchar = None;
    let mut wchar = None;
    let mut read_bytes = None;
    let mut write_bytes = None;

    for line in raw.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };

        let (field, slot): (&'static str, &mut Option<u64>) = match key.trim() {
            "rchar" => ("rchar", &mut rchar),
            "wchar" => ("wchar", &mut wchar),
            "read_bytes" => ("read_bytes", &mut read_bytes),
            "write_bytes" => ("write_bytes", &mut write_bytes),
            _ => continue,
        };

        let value = value.trim();
        let parsed: u64 = value.parse().map_err(|_| ParseError::InvalidInteger {
            file: "io",
            field,
            raw: value.to_string(),
        })?;
        *slot = Some(parsed);
    }

    let rchar = rchar.ok_or(ParseError::MissingIoField { field: "rchar" })?;
    let wchar = wchar.ok_or(ParseError::MissingIoField { field: "wchar" })?;
    let read_bytes = read_bytes.ok_or(ParseError::MissingIoField {
        field: "read_bytes",
    })?;
    let write_bytes = write_bytes.ok_or(ParseError::MissingIoField {
        field: "write_bytes",
    })?;

    Ok(IoCounters {
        disk_bytes: read_bytes.saturating_add(write_bytes),
        transfer_bytes: rchar.saturating_add(wchar),
    })
}
