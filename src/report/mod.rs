//! Rendering of the end-of-session report and the live table.

pub mod live;

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::Summary;
use crate::registry::{LiveRow, ReportRow};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const NAME_WIDTH: usize = 20;

pub const NO_DATA: &str = "No matching process data collected.";

const FINAL_HEADER: &str = "PID      NAME                 PPID     \
    CPU%(min/max/avg)          MEM_MB(min/max/avg)      \
    DISK_Bps(min/max/avg)      XFER_Bps(min/max/avg)";

const LIVE_HEADER: &str =
    "PID      NAME                 PPID     CPU%      MEM_MB    DISK_Bps    XFER_Bps";

/// Opening lines printed before a plain (non-live) session.
pub fn banner(service: &str, interval: Duration, duration: Option<Duration>) -> String {
    let stop = match duration {
        Some(d) => format!("Will stop after {:.1}s.", d.as_secs_f64()),
        None => "Press Ctrl+C to stop.".to_string(),
    };
    format!(
        "Tracking service={service} interval={:.2}s\n{stop}",
        interval.as_secs_f64()
    )
}

/// Write the min/max/avg table, one row per process record.
pub fn write_text<W: Write>(out: &mut W, rows: &[ReportRow]) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{FINAL_HEADER}")?;
    for row in rows {
        writeln!(out, "{}", format_report_row(row))?;
    }
    Ok(())
}

fn format_report_row(row: &ReportRow) -> String {
    format!(
        "{:<8} {:<20} {:<8} {:<24} {:<25} {:<24} {}",
        row.pid,
        truncate(&row.name, NAME_WIDTH),
        row.parent_pid,
        triplet(row.cpu),
        triplet(row.mem_bytes.scaled(BYTES_PER_MB)),
        triplet(row.disk_bps),
        triplet(row.xfer_bps),
    )
}

fn triplet(s: Summary) -> String {
    format!("{:.2}/{:.2}/{:.2}", s.min, s.max, s.avg)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    service: &'a str,
    processes: &'a [ReportRow],
}

/// Write the report as a single JSON document. Memory stays in bytes.
pub fn write_json<W: Write>(out: &mut W, service: &str, rows: &[ReportRow]) -> Result<()> {
    let report = JsonReport {
        service,
        processes: rows,
    };
    serde_json::to_writer_pretty(&mut *out, &report).context("serializing report")?;
    writeln!(out).context("writing report")?;
    Ok(())
}

/// Lines of one live frame: a status line, the header, then as many rows as
/// fit in `height`, each clipped to `width`.
pub fn live_frame(
    service: &str,
    interval: Duration,
    tracked: usize,
    rows: &[LiveRow],
    height: usize,
    width: usize,
) -> Vec<String> {
    let max_cols = width.saturating_sub(1);
    let max_rows = height.saturating_sub(1);

    let status = format!(
        "service={service} interval={:.2}s tracked_now={tracked} q=quit Ctrl+C=stop",
        interval.as_secs_f64()
    );

    let mut lines = Vec::with_capacity(max_rows.min(rows.len() + 2));
    lines.push(status);
    lines.push(LIVE_HEADER.to_string());
    lines.extend(rows.iter().map(format_live_row));

    lines.truncate(max_rows.max(2));
    lines
        .into_iter()
        .map(|line| truncate(&line, max_cols))
        .collect()
}

fn format_live_row(row: &LiveRow) -> String {
    format!(
        "{:<8} {:<20} {:<8} {:>8.2} {:>9.2} {:>10.2} {:>10.2}",
        row.pid,
        truncate(&row.name, NAME_WIDTH),
        row.parent_pid,
        row.current_cpu,
        row.current_mem_bytes / BYTES_PER_MB,
        row.current_disk_bps,
        row.current_xfer_bps,
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
