use crate::graph::InMemoryGraph;
use crate::support::{config_source, print_json, print_list_block, resolve_config_or_exit};
use nodegate_consistency::WriteKind;
use nodegate_dispatch::{Dispatcher, GateConfig, HealthReport};
use nodegate_kernel::EntityKey;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

pub struct Args {
    pub config: Option<String>,
    pub operations: u64,
    pub concurrency: u64,
    pub entities: u64,
    pub write_every: u64,
    pub write_kind: WriteKind,
    pub backend_latency_ms: u64,
    pub replica_lag_ms: u64,
    pub json: bool,
}

#[derive(Debug, Clone, Copy)]
struct Workload {
    operations: u64,
    concurrency: u64,
    entities: u64,
    write_every: u64,
    write_kind: WriteKind,
    backend_latency: Duration,
    replica_lag: Duration,
}

#[derive(Debug, Default)]
struct Tally {
    reads: u64,
    writes: u64,
    reads_waited: u64,
    reads_past_budget: u64,
    stale_reads: u64,
    failures: BTreeMap<&'static str, u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SoakReport {
    source: String,
    config: GateConfig,
    operations: u64,
    concurrency: u64,
    reads: u64,
    writes: u64,
    write_kind: WriteKind,
    failures: BTreeMap<&'static str, u64>,
    reads_waited: u64,
    reads_past_budget: u64,
    stale_reads: u64,
    final_version: u64,
    elapsed_ms: u64,
    health: HealthReport,
}

pub fn run(args: Args) {
    let config = resolve_config_or_exit(args.config.as_deref());
    let workload = Workload {
        operations: args.operations,
        concurrency: args.concurrency,
        entities: args.entities,
        write_every: args.write_every,
        write_kind: args.write_kind,
        backend_latency: Duration::from_millis(args.backend_latency_ms),
        replica_lag: Duration::from_millis(args.replica_lag_ms),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("error: failed to create tokio runtime: {e}");
            process::exit(1);
        });
    let (tally, final_version, elapsed, health) = runtime.block_on(drive(workload, &config));

    let report = SoakReport {
        source: config_source(args.config.as_deref()),
        config,
        operations: workload.operations,
        concurrency: workload.concurrency,
        reads: tally.reads,
        writes: tally.writes,
        write_kind: workload.write_kind,
        failures: tally.failures,
        reads_waited: tally.reads_waited,
        reads_past_budget: tally.reads_past_budget,
        stale_reads: tally.stale_reads,
        final_version,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        health,
    };

    if args.json {
        print_json(&report);
    } else {
        print_text(&report);
    }
}

async fn drive(workload: Workload, config: &GateConfig) -> (Tally, u64, Duration, HealthReport) {
    let dispatcher = Arc::new(Dispatcher::new(config));
    let graph = Arc::new(InMemoryGraph::new(
        workload.backend_latency,
        workload.replica_lag,
    ));
    let next = Arc::new(AtomicU64::new(0));
    let tally = Arc::new(Mutex::new(Tally::default()));
    let sweepers = dispatcher.start_sweepers();
    info!(?workload, "soak starting");

    let started = Instant::now();
    let mut workers = JoinSet::new();
    for _ in 0..workload.concurrency {
        workers.spawn(worker(
            workload,
            Arc::clone(&dispatcher),
            Arc::clone(&graph),
            Arc::clone(&next),
            Arc::clone(&tally),
        ));
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "soak worker aborted");
        }
    }
    let elapsed = started.elapsed();
    sweepers.stop();

    let tally = std::mem::take(&mut *tally.lock().unwrap_or_else(PoisonError::into_inner));
    (
        tally,
        dispatcher.tracker().current_version(),
        elapsed,
        dispatcher.health(),
    )
}

async fn worker(
    workload: Workload,
    dispatcher: Arc<Dispatcher>,
    graph: Arc<InMemoryGraph>,
    next: Arc<AtomicU64>,
    tally: Arc<Mutex<Tally>>,
) {
    loop {
        let index = next.fetch_add(1, Ordering::Relaxed);
        if index >= workload.operations {
            return;
        }
        let key = EntityKey::new(format!("node-{}", index % workload.entities));

        if index % workload.write_every == 0 {
            let outcome = dispatcher
                .write_entity("write_node", &key, workload.write_kind, || graph.write(&key))
                .await;
            let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
            tally.writes += 1;
            if let Err(e) = outcome {
                *tally.failures.entry(e.kind()).or_default() += 1;
            }
        } else {
            let outcome = dispatcher
                .read_entity("read_node", &key, || graph.read(&key))
                .await;
            let mut tally = tally.lock().unwrap_or_else(PoisonError::into_inner);
            tally.reads += 1;
            match outcome {
                Ok(read) => {
                    if read.waited.is_some() {
                        tally.reads_waited += 1;
                    }
                    if read.possibly_stale() {
                        tally.reads_past_budget += 1;
                    }
                    if read.value.is_stale() {
                        tally.stale_reads += 1;
                    }
                }
                Err(e) => *tally.failures.entry(e.kind()).or_default() += 1,
            }
        }
    }
}

fn print_text(report: &SoakReport) {
    println!("nodegate soak");
    println!("  Source: {}", report.source);
    println!(
        "  Operations: {} ({} reads, {} writes) across {} workers",
        report.operations, report.reads, report.writes, report.concurrency
    );
    println!("  Write kind: {}", report.write_kind);
    println!("  Elapsed: {}ms", report.elapsed_ms);
    if report.failures.is_empty() {
        println!("  Failures: none");
    } else {
        let parts: Vec<String> = report
            .failures
            .iter()
            .map(|(kind, count)| format!("{kind}={count}"))
            .collect();
        println!("  Failures: {}", parts.join(", "));
    }
    println!("  Reads that waited: {}", report.reads_waited);
    println!("  Reads past wait budget: {}", report.reads_past_budget);
    println!("  Stale reads observed: {}", report.stale_reads);
    println!("  Final version: {}", report.final_version);
    println!(
        "  Healthy: {}",
        if report.health.healthy { "yes" } else { "no" }
    );
    print_list_block(
        "Pool recommendations",
        &report.health.pool.recommendations,
    );
    print_list_block(
        "Consistency recommendations",
        &report.health.consistency.recommendations,
    );
}
