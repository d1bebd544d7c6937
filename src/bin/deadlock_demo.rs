//! Deadlock-detection demo driver.
//!
//! Runs one of the canonical scenarios on a set of shards with tracing
//! armed, scans for deadlocks, and prints the findings. Each shard writes
//! its own `deadlock_detection_graphdump.<tid>.json`.

use causetrace::runtime::{sleep, spawn, Eventual, Smp};
use causetrace::sync::{with_lock, with_units, Mutex, Semaphore};
use causetrace::trace::{decode_file, TraceConfig};
use causetrace::{
    delete_tracing, find_inactive_mutexes_at, init_tracing, parallel_for_each, start_tracing,
    stop_tracing, Shard,
};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Classic AB/BA mutex deadlock, reported by the scanner.
    AbBa,
    /// Five work items under a five-unit semaphore; no deadlock.
    Semaphore,
}

#[derive(Parser, Debug)]
#[command(name = "deadlock_demo", version, about = "Causetrace scenario driver")]
struct Cli {
    /// Number of shards to run the scenario on.
    #[arg(long = "smp", default_value_t = 1)]
    smp: u32,

    /// Scenario to drive.
    #[arg(long, value_enum, default_value = "ab-ba")]
    scenario: Scenario,

    /// Directory for the per-thread dump files.
    #[arg(long = "trace-dir", default_value = ".")]
    trace_dir: PathBuf,
}

fn ab_ba_fiber(first: Mutex, second: Mutex) -> Eventual<()> {
    with_lock(&first, move || {
        sleep(Duration::from_millis(10)).then(move |()| second.wait())
    })
}

fn run_ab_ba() -> Eventual<usize> {
    let m1 = Mutex::new();
    let m2 = Mutex::new();
    let _alpha = spawn({
        let (a, b) = (m1.clone(), m2.clone());
        move || ab_ba_fiber(a, b)
    });
    let _beta = spawn({
        let (a, b) = (m2.clone(), m1.clone());
        move || ab_ba_fiber(a, b)
    });
    // Let both fibers park, then evaluate the graph as of a point past the
    // inactivity window so the demo does not sit idle for three seconds.
    let keep = (m1, m2);
    sleep(Duration::from_millis(50)).map(move |()| {
        let horizon = Instant::now() + causetrace::sync::MAX_INACTIVE_PERIOD * 2;
        let reports = find_inactive_mutexes_at(horizon);
        for report in &reports {
            println!("{report}");
        }
        drop(keep);
        reports.len()
    })
}

fn run_semaphore() -> Eventual<usize> {
    let limit = Semaphore::new(5);
    parallel_for_each(0..5u32, move |item| {
        let limit = limit.clone();
        spawn(move || {
            with_units(&limit.clone(), 1, move || {
                sleep(Duration::from_millis(10)).map(move |()| {
                    println!("item {item} finished work");
                })
            })
        })
    })
    .map(|()| {
        let horizon = Instant::now() + causetrace::sync::MAX_INACTIVE_PERIOD * 2;
        find_inactive_mutexes_at(horizon).len()
    })
}

fn shard_main(scenario: Scenario) -> usize {
    Shard::run(|| {
        start_tracing().expect("start tracing");
        let findings = match scenario {
            Scenario::AbBa => run_ab_ba(),
            Scenario::Semaphore => run_semaphore(),
        };
        findings.then(|count| {
            stop_tracing().map(move |result| {
                result.expect("stop tracing");
                count
            })
        })
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("causetrace=info")),
        )
        .init();

    let cli = Cli::parse();
    init_tracing(TraceConfig::new().with_dir(&cli.trace_dir));

    let expected = match cli.scenario {
        Scenario::AbBa => 1,
        Scenario::Semaphore => 0,
    };

    let failures = std::sync::atomic::AtomicU32::new(0);
    Smp::invoke_on_all(cli.smp, |shard| {
        let findings = shard_main(cli.scenario);
        let tid = causetrace::runtime::gettid();
        let dump = cli
            .trace_dir
            .join(format!("deadlock_detection_graphdump.{tid}.json"));
        match decode_file(&dump) {
            Ok(records) => println!(
                "shard {shard}: {findings} finding(s), {} trace records in {}",
                records.len(),
                dump.display()
            ),
            Err(err) => {
                println!("shard {shard}: failed to decode {}: {err}", dump.display());
                failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        if findings != expected {
            eprintln!("shard {shard}: expected {expected} finding(s), saw {findings}");
            failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    });
    delete_tracing();

    let failed = failures.load(std::sync::atomic::Ordering::Relaxed) > 0;
    std::process::exit(i32::from(failed));
}
