use std::collections::HashSet;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use svctrack::pid::Discovery;
use svctrack::procfs::{parse_io, parse_stat, CounterReader, HostConstants, IoCounters, RawCounters};
use svctrack::sampler::Sampler;

const PASS_PIDS: u32 = 256;

const STAT: &str = "48213 (postgres: writer) S 1 48213 48213 0 -1 4194624 2871 0 0 0 \
    1432 877 0 0 20 0 1 0 9187234 228564992 3214 18446744073709551615 1 1 0 0 0 0 \
    4194304 19935232 84487 0 0 0 17 5 0 0 0 0 0";

const IO: &str = "rchar: 918273645\nwchar: 12873465\nsyscr: 87123\nsyscw: 4412\n\
    read_bytes: 81920000\nwrite_bytes: 4096000\ncancelled_write_bytes: 0\n";

struct AllPids(HashSet<u32>);

impl Discovery for AllPids {
    fn tracked_pids(&self) -> HashSet<u32> {
        self.0.clone()
    }
}

/// In-memory reader whose counters grow by a fixed step on every read.
struct Synthetic {
    step: std::cell::Cell<u64>,
}

impl CounterReader for Synthetic {
    fn read(&self, pid: u32) -> Option<RawCounters> {
        let step = self.step.get();
        self.step.set(step + 1);
        Some(RawCounters {
            name: format!("worker-{pid}"),
            parent_pid: 1,
            start_time: 100,
            cpu_ticks: step * 3,
            rss_bytes: 64 << 20,
            io: Some(IoCounters {
                disk_bytes: step * 4096,
                transfer_bytes: step * 8192,
            }),
        })
    }
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_stat/postgres", |b| {
        b.iter(|| parse_stat(black_box(STAT)).expect("parse stat"))
    });

    c.bench_function("parse_io/postgres", |b| {
        b.iter(|| parse_io(black_box(IO)).expect("parse io"))
    });
}

fn bench_sample_pass(c: &mut Criterion) {
    let pids: HashSet<u32> = (1000..1000 + PASS_PIDS).collect();
    let mut sampler = Sampler::new(
        AllPids(pids),
        Synthetic {
            step: std::cell::Cell::new(0),
        },
        HostConstants::default(),
    );

    let mut now = Instant::now();
    sampler.sample_once(now);

    c.bench_function("sampler/sample_once_256_pids", |b| {
        b.iter(|| {
            now += Duration::from_millis(500);
            black_box(sampler.sample_once(black_box(now)))
        })
    });

    c.bench_function("registry/live_snapshot_256_pids", |b| {
        b.iter(|| black_box(sampler.live_snapshot().len()))
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_parse(c);
    bench_sample_pass(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
