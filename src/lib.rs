//! Per-process resource tracking for the members of a systemd service.
//!
//! Each sampling pass resolves the service's cgroup to a set of pids, reads
//! their procfs counters, turns cumulative counters into rates and folds the
//! results into per-process min/max/avg aggregates.

pub mod aggregate;
pub mod config;
pub mod pid;
pub mod procfs;
pub mod rate;
pub mod registry;
pub mod report;
pub mod sampler;
