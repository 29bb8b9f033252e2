use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for a tracking session.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// systemd unit whose control group is tracked.
    #[serde(default)]
    pub service: String,

    /// Time between sampling passes. Default: 500ms.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Total session length. Zero runs until interrupted.
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,

    /// Render a live, refreshing table instead of the banner.
    #[serde(default)]
    pub live: bool,

    /// Logging verbosity (trace, debug, info, warn, error). Default: "warn".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Final report format.
    #[serde(default)]
    pub format: OutputFormat,

    /// procfs mount. Default: /proc.
    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    /// cgroup v2 mount. Default: /sys/fs/cgroup.
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// Explicit cgroup directory. When set, systemd is not consulted.
    #[serde(default)]
    pub cgroup_path: Option<PathBuf>,
}

/// Output format of the end-of-session report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Values given on the command line. Each one that is set replaces the
/// corresponding file value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub service: Option<String>,
    /// Seconds.
    pub interval: Option<f64>,
    /// Seconds. Zero or negative means unbounded.
    pub duration: Option<f64>,
    pub live: bool,
    pub log_level: Option<String>,
    pub format: Option<OutputFormat>,
    pub proc_root: Option<PathBuf>,
    pub cgroup_root: Option<PathBuf>,
    pub cgroup_path: Option<PathBuf>,
}

/// Longest accepted sampling interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn default_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from(crate::pid::DEFAULT_CGROUP_ROOT)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: String::new(),
            interval: default_interval(),
            duration: Duration::ZERO,
            live: false,
            log_level: default_log_level(),
            format: OutputFormat::default(),
            proc_root: default_proc_root(),
            cgroup_root: default_cgroup_root(),
            cgroup_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// The result is not validated, since command-line overrides are usually
    /// applied afterwards.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        Ok(cfg)
    }

    /// Apply command-line overrides on top of this configuration.
    pub fn apply(&mut self, o: Overrides) -> Result<()> {
        if let Some(service) = o.service {
            self.service = service;
        }
        if let Some(secs) = o.interval {
            self.interval = interval_from_secs(secs)?;
        }
        if let Some(secs) = o.duration {
            self.duration = duration_from_secs(secs)?;
        }
        if o.live {
            self.live = true;
        }
        if let Some(level) = o.log_level {
            self.log_level = level;
        }
        if let Some(format) = o.format {
            self.format = format;
        }
        if let Some(root) = o.proc_root {
            self.proc_root = root;
        }
        if let Some(root) = o.cgroup_root {
            self.cgroup_root = root;
        }
        if o.cgroup_path.is_some() {
            self.cgroup_path = o.cgroup_path;
        }
        Ok(())
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.service.trim().is_empty() {
            bail!("service is required");
        }

        if self.interval.is_zero() {
            bail!("interval must be > 0");
        }

        if self.interval > MAX_INTERVAL {
            bail!(
                "interval must be at most {}s, got {}s",
                MAX_INTERVAL.as_secs(),
                self.interval.as_secs_f64()
            );
        }

        if self.live && self.format == OutputFormat::Json {
            bail!("live mode only supports the text report format");
        }

        Ok(())
    }

    /// Session length bound, `None` when unbounded.
    pub fn duration_limit(&self) -> Option<Duration> {
        (!self.duration.is_zero()).then_some(self.duration)
    }
}

fn interval_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        bail!("interval must be > 0");
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("interval out of range: {secs}"))
}

fn duration_from_secs(secs: f64) -> Result<Duration> {
    if secs.is_nan() {
        bail!("duration must be a number");
    }
    if secs <= 0.0 {
        return Ok(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs).with_context(|| format!("duration out of range: {secs}"))
}
