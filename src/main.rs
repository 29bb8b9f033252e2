use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use svctrack::config::{Config, OutputFormat, Overrides};
use svctrack::pid::{CgroupPathDiscovery, Discovery, ServiceCgroupDiscovery};
use svctrack::procfs::{HostConstants, ProcfsReader};
use svctrack::report::{self, live};
use svctrack::sampler::{Quiet, Sampler, Session, SessionOutcome};

const EXIT_NO_DATA: u8 = 1;
const EXIT_INVALID_CONFIG: u8 = 2;
const EXIT_RUNTIME_FAILURE: u8 = 3;

/// Track CPU, memory and I/O of every process in a systemd service.
#[derive(Parser)]
#[command(name = "svctrack", about)]
struct Cli {
    /// systemd service name, e.g. nginx.service.
    #[arg(short, long)]
    service: Option<String>,

    /// Sampling interval in seconds.
    #[arg(short, long, allow_negative_numbers = true)]
    interval: Option<f64>,

    /// Stop after this many seconds (0 runs until interrupted).
    #[arg(short, long, allow_negative_numbers = true)]
    duration: Option<f64>,

    /// Show a live, refreshing table.
    #[arg(long)]
    live: bool,

    /// Final report format.
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Path to a YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// procfs mount point.
    #[arg(long)]
    proc_root: Option<PathBuf>,

    /// cgroup v2 mount point.
    #[arg(long)]
    cgroup_root: Option<PathBuf>,

    /// Track this cgroup directory instead of asking systemd.
    #[arg(long)]
    cgroup_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            service: self.service.clone(),
            interval: self.interval,
            duration: self.duration,
            live: self.live,
            log_level: self.log_level.clone(),
            format: self.format,
            proc_root: self.proc_root.clone(),
            cgroup_root: self.cgroup_root.clone(),
            cgroup_path: self.cgroup_path.clone(),
        }
    }
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("svctrack {}", version::full());
        return ExitCode::SUCCESS;
    }

    let cfg = match load_config(&cli).and_then(|cfg| {
        init_tracing(&cfg.log_level)?;
        Ok(cfg)
    }) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::from(EXIT_INVALID_CONFIG);
        }
    };

    match run(cfg) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "svctrack failed");
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_RUNTIME_FAILURE)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    cfg.apply(cli.overrides())?;
    cfg.validate()?;
    Ok(cfg)
}

fn init_tracing(level: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run(cfg: Config) -> Result<ExitCode> {
    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        service = %cfg.service,
        "starting svctrack",
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async {
        match cfg.cgroup_path.clone() {
            Some(path) => track(&cfg, CgroupPathDiscovery::new(path)).await,
            None => {
                let discovery =
                    ServiceCgroupDiscovery::new(cfg.service.clone(), cfg.cgroup_root.clone());
                track(&cfg, discovery).await
            }
        }
    })
}

async fn track<D: Discovery>(cfg: &Config, discovery: D) -> Result<ExitCode> {
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let host = HostConstants::detect();
    tracing::debug!(
        ticks_per_second = host.ticks_per_second,
        page_size = host.page_size,
        "host constants"
    );

    let reader = ProcfsReader::new(cfg.proc_root.clone(), host.page_size);
    let sampler = Sampler::new(discovery, reader, host);
    let mut session = Session::new(sampler, cfg.interval, cfg.duration_limit());

    let live_view = if cfg.live && live::is_interactive() {
        Some(live::LiveView::new(cfg.service.clone(), cfg.interval)?)
    } else {
        if cfg.live {
            tracing::warn!("stdout is not a terminal, live view disabled");
        }
        None
    };

    let outcome = match live_view {
        Some(mut view) => {
            let outcome = session.run(&cancel, &mut view).await;
            // Leave the alternate screen before printing the report.
            drop(view);
            outcome
        }
        None => {
            println!(
                "{}",
                report::banner(&cfg.service, cfg.interval, cfg.duration_limit())
            );
            session.run(&cancel, &mut Quiet).await
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if outcome == SessionOutcome::NoData {
        tracing::warn!(service = %cfg.service, "no process data collected");
        writeln!(out, "{}", report::NO_DATA).context("writing report")?;
        return Ok(ExitCode::from(EXIT_NO_DATA));
    }

    let rows = session.sampler().final_report();
    match cfg.format {
        OutputFormat::Text => report::write_text(&mut out, &rows).context("writing report")?,
        OutputFormat::Json => report::write_json(&mut out, &cfg.service, &rows)?,
    }
    out.flush().context("flushing report")?;

    tracing::info!(processes = rows.len(), "svctrack stopped");
    Ok(ExitCode::SUCCESS)
}

/// Cancel `cancel` on the first SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
        cancel.cancel();
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [EXIT_NO_DATA, EXIT_INVALID_CONFIG, EXIT_RUNTIME_FAILURE];
        for (i, a) in codes.iter().enumerate() {
            assert_ne!(*a, 0);
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn test_sigint_before_first_poll_cancels() {
        let cancel = CancellationToken::new();
        spawn_signal_handler(cancel.clone()).expect("register handlers");

        // Delivered before the handler task has been polled once.
        unsafe { libc::raise(libc::SIGINT) };

        tokio::time::timeout(Duration::from_secs(5), cancel.cancelled())
            .await
            .expect("token cancelled by SIGINT");
    }
}
