//! The sampling loop: discovery, counter reads, rate derivation and
//! aggregation, one pass per interval.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pid::Discovery;
use crate::procfs::{CounterReader, HostConstants};
use crate::rate::{self, PrevSample};
use crate::registry::{LiveRow, ProcessRegistry, ReportRow};

// Bounds a single inter-pass sleep so the deadline cannot overflow.
const MAX_SLEEP: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Owns the registry and previous-sample table for one session.
///
/// All mutation happens through [`Sampler::sample_once`], so a single task
/// drives it and no locking is needed.
pub struct Sampler<D, R> {
    discovery: D,
    reader: R,
    host: HostConstants,
    registry: ProcessRegistry,
    prev: HashMap<u32, PrevSample>,
}

impl<D: Discovery, R: CounterReader> Sampler<D, R> {
    pub fn new(discovery: D, reader: R, host: HostConstants) -> Self {
        Self {
            discovery,
            reader,
            host,
            registry: ProcessRegistry::new(),
            prev: HashMap::new(),
        }
    }

    /// Run one sampling pass at `now`.
    ///
    /// Returns the size of the tracked set, regardless of how many of those
    /// pids could actually be read.
    pub fn sample_once(&mut self, now: Instant) -> usize {
        let pids = self.discovery.tracked_pids();

        for &pid in &pids {
            let Some(raw) = self.reader.read(pid) else {
                continue;
            };

            if self.registry.is_reused(pid, raw.start_time) {
                self.registry.retire(pid);
                self.prev.remove(&pid);
            }

            let basis = self.prev.get(&pid);
            let rates = rate::compute(basis, &raw, now, self.host.ticks_per_second);
            let next = PrevSample::carry_forward(basis, &raw, now);

            self.registry.record(pid, &raw, &rates, now);
            self.prev.insert(pid, next);
        }

        debug!(tracked = pids.len(), records = self.registry.len(), "sampling pass");
        pids.len()
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn final_report(&self) -> Vec<ReportRow> {
        self.registry.final_report()
    }

    pub fn live_snapshot(&self) -> Vec<LiveRow> {
        self.registry.live_snapshot()
    }
}

/// How a session ended, from the report's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// At least one process was observed.
    Completed,
    /// No process was ever successfully read.
    NoData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    DurationElapsed,
    Quit,
}

/// Hook invoked after every pass, used by the live view to render and poll
/// for a quit request.
pub trait PassObserver {
    /// Return `ControlFlow::Break(())` to end the session.
    fn after_pass(&mut self, tracked: usize, registry: &ProcessRegistry) -> ControlFlow<()>;
}

/// Observer for the plain (non-live) mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct Quiet;

impl PassObserver for Quiet {
    fn after_pass(&mut self, _tracked: usize, _registry: &ProcessRegistry) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Drives a [`Sampler`] at a fixed interval until cancelled, quit, or the
/// optional duration bound elapses.
pub struct Session<D, R> {
    sampler: Sampler<D, R>,
    interval: Duration,
    duration: Option<Duration>,
}

impl<D: Discovery, R: CounterReader> Session<D, R> {
    /// `duration` of `None` (or zero) runs until cancelled.
    pub fn new(sampler: Sampler<D, R>, interval: Duration, duration: Option<Duration>) -> Self {
        Self {
            sampler,
            interval,
            duration: duration.filter(|d| !d.is_zero()),
        }
    }

    pub fn sampler(&self) -> &Sampler<D, R> {
        &self.sampler
    }

    /// Run passes until a stop condition is observed.
    ///
    /// Cancellation and the duration bound are checked at the top of each
    /// pass; a pass in progress always completes. After each pass the loop
    /// sleeps for whatever is left of the interval. Overruns are not caught
    /// up.
    pub async fn run<O: PassObserver>(
        &mut self,
        cancel: &CancellationToken,
        observer: &mut O,
    ) -> SessionOutcome {
        let started = tokio::time::Instant::now();
        let mut passes: u64 = 0;

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let pass_start = tokio::time::Instant::now();
            if self
                .duration
                .is_some_and(|d| pass_start.duration_since(started) >= d)
            {
                break StopReason::DurationElapsed;
            }

            let tracked = self.sampler.sample_once(pass_start.into_std());
            passes += 1;

            if observer
                .after_pass(tracked, self.sampler.registry())
                .is_break()
            {
                break StopReason::Quit;
            }

            let next_pass = pass_start + self.interval.min(MAX_SLEEP);

            tokio::select! {
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep_until(next_pass) => {}
            }
        };

        info!(
            ?reason,
            passes,
            records = self.sampler.registry().len(),
            "sampling stopped"
        );

        if self.sampler.registry().is_empty() {
            SessionOutcome::NoData
        } else {
            SessionOutcome::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::HashSet;

    use crate::procfs::{IoCounters, RawCounters};

    struct FixedPids(HashSet<u32>);

    impl Discovery for FixedPids {
        fn tracked_pids(&self) -> HashSet<u32> {
            self.0.clone()
        }
    }

    /// Reader that replays a scripted sequence of reads per pid.
    #[derive(Default)]
    struct Scripted {
        reads: RefCell<HashMap<u32, Vec<Option<RawCounters>>>>,
    }

    impl Scripted {
        fn push(&self, pid: u32, raw: Option<RawCounters>) {
            self.reads.borrow_mut().entry(pid).or_default().push(raw);
        }
    }

    impl CounterReader for Scripted {
        fn read(&self, pid: u32) -> Option<RawCounters> {
            let mut reads = self.reads.borrow_mut();
            let queue = reads.get_mut(&pid)?;
            if queue.is_empty() {
                return None;
            }
            queue.remove(0)
        }
    }

    fn raw(cpu_ticks: u64, rss_bytes: u64, io: Option<(u64, u64)>) -> RawCounters {
        RawCounters {
            name: "svc".to_string(),
            parent_pid: 1,
            start_time: 1000,
            cpu_ticks,
            rss_bytes,
            io: io.map(|(disk_bytes, transfer_bytes)| IoCounters {
                disk_bytes,
                transfer_bytes,
            }),
        }
    }

    fn host() -> HostConstants {
        HostConstants {
            ticks_per_second: 100,
            page_size: 4096,
        }
    }

    #[test]
    fn test_cpu_min_max_avg_over_three_passes() {
        let reader = Scripted::default();
        for ticks in [0, 50, 150] {
            reader.push(100, Some(raw(ticks, 1 << 20, None)));
        }
        let mut sampler = Sampler::new(FixedPids(HashSet::from([100])), reader, host());

        let t0 = Instant::now();
        for secs in 0..3 {
            assert_eq!(sampler.sample_once(t0 + Duration::from_secs(secs)), 1);
        }

        let rec = sampler.registry().get(100).expect("record");
        assert_eq!(rec.cpu.count(), 2);
        let cpu = rec.cpu.summarize();
        assert_eq!(cpu.min, 50.0);
        assert_eq!(cpu.max, 100.0);
        assert_eq!(cpu.avg, 75.0);
        assert_eq!(rec.mem.count(), 3);
    }

    #[test]
    fn test_io_failure_keeps_basis_and_stale_current() {
        let reader = Scripted::default();
        reader.push(7, Some(raw(0, 100, Some((1000, 1000)))));
        reader.push(7, Some(raw(0, 100, None)));
        reader.push(7, None);
        reader.push(7, Some(raw(0, 100, Some((1400, 1400)))));
        let mut sampler = Sampler::new(FixedPids(HashSet::from([7])), reader, host());

        let t0 = Instant::now();
        sampler.sample_once(t0);
        sampler.sample_once(t0 + Duration::from_secs(1));
        let before_miss = sampler.registry().get(7).expect("record").current;

        sampler.sample_once(t0 + Duration::from_millis(1500));
        let after_miss = sampler.registry().get(7).expect("record");
        assert_eq!(after_miss.current, before_miss);
        assert_eq!(after_miss.last_seen, t0 + Duration::from_secs(1));

        sampler.sample_once(t0 + Duration::from_secs(2));
        let rec = sampler.registry().get(7).expect("record");
        assert_eq!(rec.disk.count(), 1);
        assert_eq!(rec.disk.summarize().avg, 200.0);
        assert_eq!(rec.current.disk_bps, 200.0);
    }

    #[test]
    fn test_empty_group_tracks_nothing() {
        let mut sampler = Sampler::new(FixedPids(HashSet::new()), Scripted::default(), host());
        assert_eq!(sampler.sample_once(Instant::now()), 0);
        assert!(sampler.registry().is_empty());
    }

    #[test]
    fn test_unreadable_pid_counts_as_tracked() {
        let mut sampler =
            Sampler::new(FixedPids(HashSet::from([1, 2])), Scripted::default(), host());
        assert_eq!(sampler.sample_once(Instant::now()), 2);
        assert!(sampler.registry().is_empty());
    }

    #[test]
    fn test_pid_reuse_resets_basis() {
        let reader = Scripted::default();
        reader.push(9, Some(raw(5000, 0, None)));
        let mut reborn = raw(10, 0, None);
        reborn.start_time = 2000;
        reader.push(9, Some(reborn));
        let mut sampler = Sampler::new(FixedPids(HashSet::from([9])), reader, host());

        let t0 = Instant::now();
        sampler.sample_once(t0);
        sampler.sample_once(t0 + Duration::from_secs(1));

        assert_eq!(sampler.registry().retired().len(), 1);
        let rec = sampler.registry().get(9).expect("record");
        assert_eq!(rec.identity.start_time, 2000);
        // The new process starts with no basis, so no CPU rate yet.
        assert_eq!(rec.cpu.count(), 0);
        assert_eq!(sampler.final_report().len(), 2);
    }

    struct QuitAfter(usize);

    impl PassObserver for QuitAfter {
        fn after_pass(&mut self, _tracked: usize, _registry: &ProcessRegistry) -> ControlFlow<()> {
            self.0 = self.0.saturating_sub(1);
            if self.0 == 0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_empty_group_is_no_data() {
        let sampler = Sampler::new(FixedPids(HashSet::new()), Scripted::default(), host());
        let mut session = Session::new(
            sampler,
            Duration::from_millis(100),
            Some(Duration::from_secs(1)),
        );

        let outcome = session.run(&CancellationToken::new(), &mut Quiet).await;
        assert_eq!(outcome, SessionOutcome::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_quit_stops_loop() {
        let reader = Scripted::default();
        for ticks in 0..10 {
            reader.push(1, Some(raw(ticks, 0, None)));
        }
        let sampler = Sampler::new(FixedPids(HashSet::from([1])), reader, host());
        let mut session = Session::new(sampler, Duration::from_millis(100), None);

        let outcome = session.run(&CancellationToken::new(), &mut QuitAfter(3)).await;
        assert_eq!(outcome, SessionOutcome::Completed);
        let rec = session.sampler().registry().get(1).expect("record");
        assert_eq!(rec.mem.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_huge_interval_does_not_overflow() {
        let reader = Scripted::default();
        reader.push(1, Some(raw(0, 0, None)));
        let sampler = Sampler::new(FixedPids(HashSet::from([1])), reader, host());
        let mut session = Session::new(sampler, Duration::MAX, Some(Duration::from_millis(1)));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = session.run(&cancel, &mut Quiet).await;
        assert_eq!(outcome, SessionOutcome::Completed);
        assert_eq!(session.sampler().registry().get(1).expect("record").mem.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_precancelled_runs_no_pass() {
        let reader = Scripted::default();
        reader.push(1, Some(raw(0, 0, None)));
        let sampler = Sampler::new(FixedPids(HashSet::from([1])), reader, host());
        let mut session = Session::new(sampler, Duration::from_millis(100), None);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = session.run(&cancel, &mut Quiet).await;
        assert_eq!(outcome, SessionOutcome::NoData);
    }
}
