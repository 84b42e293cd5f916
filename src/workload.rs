pub mod partition;
pub mod planner;
pub mod worker;

#[cfg(test)]
mod mock;

use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;
use thousands::Separable;
use tracing::{info, warn};

use crate::config::BenchmarkConfig;
use crate::database::DataStoreClient;
use crate::error::BenchmarkError;
use crate::generator::{DocumentGen, DocumentTemplate};
use crate::workload::partition::BenchmarkPlan;
use crate::workload::planner::{ConcurrencyBasis, ConcurrencyDecision};
use crate::workload::worker::{InsertOutcome, StopSignal, Worker};

/// Highest trackable insert call latency, one hour.
const MAX_LATENCY_MICRO_SEC: u64 = 3_600_000_000;

pub fn latency_histogram() -> Result<Histogram<u64>, hdrhistogram::errors::CreationError> {
    Histogram::new_with_bounds(1, MAX_LATENCY_MICRO_SEC, 3)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RunStatus {
    Complete,
    CompletedWithFailures { failed: u64 },
    /// At least one worker stopped early because its client became unusable.
    PartialFailure { workers: Vec<usize> },
    /// The run deadline passed before these workers inserted their whole share.
    Stopped { workers: Vec<usize> },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencySummary {
    pub p50_micro_sec: u64,
    pub p95_micro_sec: u64,
    pub p99_micro_sec: u64,
    pub p999_micro_sec: u64,
    pub max_micro_sec: u64,
}

impl LatencySummary {
    fn from_histogram(h: &Histogram<u64>) -> Self {
        if h.is_empty() {
            return LatencySummary::default();
        }
        LatencySummary {
            p50_micro_sec: h.value_at_quantile(0.50),
            p95_micro_sec: h.value_at_quantile(0.95),
            p99_micro_sec: h.value_at_quantile(0.99),
            p999_micro_sec: h.value_at_quantile(0.999),
            max_micro_sec: h.max(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BenchmarkResult {
    pub status: RunStatus,
    pub concurrency: ConcurrencyDecision,
    pub capacity_units: u64,
    #[serde(with = "humantime_serde")]
    pub total_elapsed: Duration,
    pub total_attempted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    #[serde(with = "humantime_serde")]
    pub average_insert_latency: Duration,
    pub insert_call_latency: LatencySummary,
    pub per_worker: Vec<InsertOutcome>,
}

impl BenchmarkResult {
    pub fn is_partial_failure(&self) -> bool {
        matches!(self.status, RunStatus::PartialFailure { .. })
    }

    pub fn throughput(&self) -> f64 {
        if self.total_succeeded == 0 || self.total_elapsed.is_zero() {
            0.0
        } else {
            self.total_succeeded as f64 / self.total_elapsed.as_secs_f64()
        }
    }
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::CompletedWithFailures { failed } => write!(
                f,
                "completed with {} failed inserts",
                failed.separate_with_underscores()
            ),
            RunStatus::PartialFailure { workers } => {
                write!(f, "partial failure (workers {workers:?} aborted)")
            }
            RunStatus::Stopped { workers } => {
                write!(f, "stopped early (workers {workers:?} did not finish)")
            }
        }
    }
}

impl Display for BenchmarkResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let latency = &self.insert_call_latency;
        let basis = match self.concurrency.basis {
            ConcurrencyBasis::Explicit => "explicit",
            ConcurrencyBasis::DerivedFromCapacity => "derived from capacity",
        };

        writeln!(f, "=== INSERT ===")?;
        writeln!(
            f,
            "documents: {} | succeeded: {} | failed: {} | time: {:.1?} | throughput: {} docs/s",
            self.total_attempted.separate_with_underscores(),
            self.total_succeeded.separate_with_underscores(),
            self.total_failed.separate_with_underscores(),
            self.total_elapsed,
            (self.throughput() as u64).separate_with_underscores()
        )?;
        writeln!(
            f,
            "average insert time: {:.3?} | call p50: {} µs | p95: {} µs | p99: {} µs \
             | p99.9: {} µs",
            self.average_insert_latency,
            latency.p50_micro_sec.separate_with_underscores(),
            latency.p95_micro_sec.separate_with_underscores(),
            latency.p99_micro_sec.separate_with_underscores(),
            latency.p999_micro_sec.separate_with_underscores()
        )?;
        writeln!(
            f,
            "workers: {} ({basis}, {} capacity units)",
            self.concurrency.worker_count,
            self.capacity_units.separate_with_underscores()
        )?;

        writeln!(f, "=== WORKERS ===")?;
        for w in &self.per_worker {
            write!(
                f,
                "worker {}: attempted: {} | succeeded: {} | failed: {} | time: {:.1?}",
                w.worker_id,
                w.attempted.separate_with_underscores(),
                w.succeeded.separate_with_underscores(),
                w.failed.separate_with_underscores(),
                w.elapsed
            )?;
            if w.cancelled {
                write!(f, " | stopped early")?;
            }
            writeln!(f)?;
            if let Some(fatal) = &w.fatal {
                writeln!(f, "  fatal: {fatal}")?;
            }
            for sample in w.failure_samples.iter().filter(|s| Some(*s) != w.fatal.as_ref()) {
                writeln!(f, "  failure: {sample}")?;
            }
        }

        write!(f, "status: {}", self.status)
    }
}

/// Runs the benchmark described by `config` against `client`.
///
/// The client is initialized first and disposed once every worker has finished.
/// Configuration and initialization errors abort the run before any worker starts;
/// a worker that loses its client only ends itself and is reported in the result.
pub fn execute(
    config: &BenchmarkConfig,
    template: &DocumentTemplate,
    client: &mut dyn DataStoreClient,
    stop: &StopSignal,
) -> Result<BenchmarkResult, BenchmarkError> {
    let total_documents = config.total_documents()?;
    let capacity_units = client.init().map_err(BenchmarkError::Initialization)?;

    let result = run(config, template, &*client, stop, total_documents, capacity_units);

    if let Err(e) = client.dispose() {
        warn!("failed to dispose client: {e:#}");
    }
    result
}

fn run(
    config: &BenchmarkConfig,
    template: &DocumentTemplate,
    client: &dyn DataStoreClient,
    stop: &StopSignal,
    total_documents: u64,
    capacity_units: u64,
) -> Result<BenchmarkResult, BenchmarkError> {
    let concurrency = planner::plan(capacity_units, config.degree_of_parallelism)?;
    let plan = partition::split(total_documents, concurrency.worker_count)?;
    let latency_hist =
        latency_histogram().map_err(|e| BenchmarkError::config(format!("latency histogram: {e}")))?;
    let insert_mode = config.insert_mode();
    let partition_key = config.partition_key_property();

    info!("Capacity units: {}", capacity_units);
    if let Some(pk) = &partition_key {
        info!("Partition key: {}", pk);
    }
    info!("Workers: {} ({:?})", plan.worker_count(), concurrency.basis);
    info!("Insert API: {}", insert_mode);

    let start_time = Instant::now();
    let per_worker = std::thread::scope(|s| {
        let handles: Vec<_> = plan
            .per_worker_counts()
            .iter()
            .enumerate()
            .map(|(id, &count)| {
                let worker = Worker {
                    id,
                    client,
                    documents: DocumentGen::new(
                        template,
                        client.id_field(),
                        partition_key.as_deref(),
                    ),
                    batch_size: insert_mode.batch_size_for(count),
                    stop,
                };
                let hist = latency_hist.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn_scoped(s, move || worker.run(count, hist));
                (id, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(id, handle)| match handle {
                // A panicking worker's own counts are lost with it, so inserts it
                // already made are missing from the totals.
                Ok(h) => h.join().unwrap_or_else(|_| {
                    InsertOutcome::lost(id, latency_hist.clone(), "worker panicked".to_owned())
                }),
                Err(e) => InsertOutcome::lost(
                    id,
                    latency_hist.clone(),
                    format!("failed to spawn worker: {e}"),
                ),
            })
            .collect::<Vec<_>>()
    });
    let total_elapsed = start_time.elapsed();

    Ok(aggregate(
        &plan,
        concurrency,
        capacity_units,
        per_worker,
        total_elapsed,
        latency_hist,
    ))
}

fn aggregate(
    plan: &BenchmarkPlan,
    concurrency: ConcurrencyDecision,
    capacity_units: u64,
    per_worker: Vec<InsertOutcome>,
    total_elapsed: Duration,
    mut latency_hist: Histogram<u64>,
) -> BenchmarkResult {
    let mut total_attempted = 0;
    let mut total_succeeded = 0;
    let mut total_failed = 0;
    let mut aborted = vec![];
    let mut stopped = vec![];

    for outcome in &per_worker {
        total_attempted += outcome.attempted;
        total_succeeded += outcome.succeeded;
        total_failed += outcome.failed;
        if outcome.fatal.is_some() {
            aborted.push(outcome.worker_id);
        } else if outcome.cancelled {
            stopped.push(outcome.worker_id);
        }
        if let Err(e) = latency_hist.add(&outcome.latency_hist_micro_sec) {
            warn!(worker = outcome.worker_id, "failed to merge latencies: {e}");
        }
    }

    let average_insert_latency = if total_attempted == 0 {
        Duration::ZERO
    } else {
        total_elapsed.div_f64(total_attempted as f64)
    };

    let status = if !aborted.is_empty() {
        RunStatus::PartialFailure { workers: aborted }
    } else if !stopped.is_empty() {
        RunStatus::Stopped { workers: stopped }
    } else if total_failed > 0 {
        RunStatus::CompletedWithFailures {
            failed: total_failed,
        }
    } else {
        RunStatus::Complete
    };

    info!(
        "Inserted {} of {} documents in {:.1?}",
        total_succeeded,
        plan.total_documents(),
        total_elapsed
    );

    BenchmarkResult {
        status,
        concurrency,
        capacity_units,
        total_elapsed,
        total_attempted,
        total_succeeded,
        total_failed,
        average_insert_latency,
        insert_call_latency: LatencySummary::from_histogram(&latency_hist),
        per_worker,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Parallelism;
    use crate::database::{DatabaseType, get_client};
    use crate::workload::mock::MockClient;

    fn config(documents: i64, parallelism: Parallelism) -> BenchmarkConfig {
        BenchmarkConfig {
            cosmos_db_name: "bench".to_owned(),
            cosmos_db_api: DatabaseType::Memory,
            authorization_key: "secret".to_owned(),
            database_name: "db".to_owned(),
            collection_name: "docs".to_owned(),
            collection_throughput: 4000,
            number_of_documents_to_insert: documents,
            partition_key: None,
            should_cleanup_on_start: false,
            should_cleanup_on_finish: false,
            document_template_file: "sample.json".into(),
            degree_of_parallelism: parallelism,
            mongo_insert_many: false,
            mongo_insert_many_batch_size: 0,
            data_directory: None,
        }
    }

    fn template() -> DocumentTemplate {
        DocumentTemplate::parse(r#"{"name": "sample", "tags": ["a", "b"]}"#).unwrap()
    }

    fn execute_mock(
        config: &BenchmarkConfig,
        client: &mut MockClient,
    ) -> Result<BenchmarkResult, BenchmarkError> {
        execute(config, &template(), client, &StopSignal::default())
    }

    #[test]
    fn all_inserts_succeed() {
        let mut client = MockClient::default();
        let result = execute_mock(&config(100, Parallelism::Explicit(4)), &mut client).unwrap();

        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.total_attempted, 100);
        assert_eq!(result.total_succeeded, 100);
        assert_eq!(result.total_failed, 0);
        let shares: Vec<_> = result.per_worker.iter().map(|w| w.attempted).collect();
        assert_eq!(shares, vec![25, 25, 25, 25]);
        assert_eq!(client.calls(), 100);
        assert_eq!(client.disposals, 1);
    }

    #[test]
    fn remainder_is_distributed() {
        let mut client = MockClient::default();
        let result = execute_mock(&config(10, Parallelism::Explicit(4)), &mut client).unwrap();

        let shares: Vec<_> = result.per_worker.iter().map(|w| w.succeeded).collect();
        assert_eq!(shares, vec![3, 3, 2, 2]);
        assert_eq!(result.total_succeeded, 10);
    }

    #[test]
    fn idle_workers_still_report() {
        let mut client = MockClient::default();
        let result = execute_mock(&config(2, Parallelism::Explicit(4)), &mut client).unwrap();

        assert_eq!(result.per_worker.len(), 4);
        assert_eq!(result.per_worker[3].attempted, 0);
        assert_eq!(result.per_worker[3].worker_id, 3);
        assert_eq!(result.total_succeeded, 2);
    }

    #[test]
    fn fatal_worker_does_not_cancel_siblings() {
        let mut client = MockClient {
            fatal_after: Some(("worker-1".to_owned(), 5)),
            ..Default::default()
        };
        let result = execute_mock(&config(100, Parallelism::Explicit(4)), &mut client).unwrap();

        assert!(result.is_partial_failure());
        assert_eq!(result.status, RunStatus::PartialFailure { workers: vec![1] });
        assert_eq!(result.total_attempted, 5 + 25 + 25 + 25);
        assert_eq!(result.total_succeeded, 80);
        assert_eq!(result.per_worker[1].attempted, 5);
        assert!(result.per_worker[1].fatal.is_some());
        for id in [0, 2, 3] {
            let w = &result.per_worker[id];
            assert_eq!((w.attempted, w.succeeded, w.failed), (25, 25, 0));
            assert!(w.fatal.is_none());
        }
        assert_eq!(client.disposals, 1);
    }

    #[test]
    fn rejected_inserts_complete_with_failures() {
        let mut client = MockClient {
            reject_every: Some(3),
            ..Default::default()
        };
        let result = execute_mock(&config(20, Parallelism::Explicit(2)), &mut client).unwrap();

        // each worker inserts 10 documents and loses calls 3, 6 and 9
        assert_eq!(result.total_attempted, 20);
        assert_eq!(result.total_failed, 6);
        assert_eq!(result.status, RunStatus::CompletedWithFailures { failed: 6 });
    }

    #[test]
    fn auto_parallelism_uses_capacity_units() {
        let mut client = MockClient {
            capacity_units: 3500,
            ..Default::default()
        };
        let result = execute_mock(&config(30, Parallelism::Auto), &mut client).unwrap();

        assert_eq!(result.concurrency.worker_count, 3);
        assert_eq!(result.concurrency.basis, ConcurrencyBasis::DerivedFromCapacity);
        assert_eq!(result.capacity_units, 3500);
        assert_eq!(result.total_succeeded, 30);
    }

    #[test]
    fn insert_many_batches_whole_share() {
        let mut cfg = config(40, Parallelism::Explicit(2));
        cfg.mongo_insert_many = true;
        let mut client = MockClient::default();
        execute_mock(&cfg, &mut client).unwrap();
        assert_eq!(client.batch_sizes(), vec![20, 20]);

        cfg.mongo_insert_many_batch_size = 15;
        let mut client = MockClient::default();
        execute_mock(&cfg, &mut client).unwrap();
        let mut sizes = client.batch_sizes();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![5, 5, 15, 15]);
    }

    #[test]
    fn initialization_failure_aborts_before_workers() {
        let mut client = MockClient {
            fail_init: true,
            ..Default::default()
        };
        let err = execute_mock(&config(10, Parallelism::Explicit(2)), &mut client).unwrap_err();
        assert!(matches!(err, BenchmarkError::Initialization(_)));
        assert_eq!(client.calls(), 0);
        assert_eq!(client.disposals, 0);
    }

    #[test]
    fn invalid_configuration_aborts_before_workers() {
        let mut client = MockClient::default();
        let err = execute_mock(&config(-1, Parallelism::Explicit(2)), &mut client).unwrap_err();
        assert!(matches!(err, BenchmarkError::Configuration(_)));

        let err = execute_mock(&config(10, Parallelism::Explicit(0)), &mut client).unwrap_err();
        assert!(matches!(err, BenchmarkError::Configuration(_)));
        assert_eq!(client.calls(), 0);
        assert_eq!(client.disposals, 1);
    }

    #[test]
    fn nothing_attempted_reports_zero_latency() {
        let mut client = MockClient::default();
        let result = execute_mock(&config(0, Parallelism::Explicit(3)), &mut client).unwrap();
        assert_eq!(result.total_attempted, 0);
        assert_eq!(result.average_insert_latency, Duration::ZERO);
        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.insert_call_latency.p50_micro_sec, 0);
    }

    #[test]
    fn stopped_run_returns_partial_counts() {
        let stop = StopSignal::with_deadline(Instant::now());
        let mut client = MockClient::default();
        let result =
            execute(&config(50, Parallelism::Explicit(5)), &template(), &mut client, &stop)
                .unwrap();
        assert_eq!(result.total_attempted, 0);
        assert!(result.per_worker.iter().all(|w| w.cancelled));
        assert_eq!(
            result.status,
            RunStatus::Stopped {
                workers: vec![0, 1, 2, 3, 4]
            }
        );
        assert!(
            result
                .to_string()
                .ends_with("status: stopped early (workers [0, 1, 2, 3, 4] did not finish)")
        );

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["kind"], "stopped");
    }

    #[test]
    fn fatal_worker_takes_precedence_over_stopped_ones() {
        let outcome = |id, cancelled, fatal: Option<&str>| {
            let mut o = InsertOutcome::new(id, latency_histogram().unwrap());
            o.cancelled = cancelled;
            o.fatal = fatal.map(str::to_owned);
            o
        };
        let plan = partition::split(20, 2).unwrap();
        let concurrency = ConcurrencyDecision {
            worker_count: 2,
            basis: ConcurrencyBasis::Explicit,
        };
        let result = aggregate(
            &plan,
            concurrency,
            0,
            vec![outcome(0, true, None), outcome(1, false, Some("connection closed"))],
            Duration::from_millis(5),
            latency_histogram().unwrap(),
        );
        assert_eq!(result.status, RunStatus::PartialFailure { workers: vec![1] });
    }

    #[test]
    fn summary_renders_totals_and_failures() {
        let mut client = MockClient {
            reject_every: Some(2),
            ..Default::default()
        };
        let result = execute_mock(&config(4, Parallelism::Explicit(1)), &mut client).unwrap();
        let text = result.to_string();
        assert!(text.contains("documents: 4 | succeeded: 2 | failed: 2"));
        assert!(text.contains("failure: insert rejected"));
        assert!(text.ends_with("status: completed with 2 failed inserts"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["total_failed"], 2);
        assert_eq!(json["status"]["kind"], "completed_with_failures");
        assert_eq!(json["per_worker"][0]["failure_samples"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn end_to_end_against_embedded_backends() {
        for backend in [DatabaseType::Memory, DatabaseType::DocumentDb, DatabaseType::MongoDb] {
            let mut cfg = config(57, Parallelism::Explicit(4));
            cfg.cosmos_db_api = backend;
            cfg.partition_key = Some("/tenant".to_owned());
            cfg.mongo_insert_many = backend == DatabaseType::MongoDb;
            cfg.mongo_insert_many_batch_size = 5;
            cfg.should_cleanup_on_finish = true;

            let mut client = get_client(backend, &cfg);
            let result =
                execute(&cfg, &template(), client.as_mut(), &StopSignal::default()).unwrap();
            assert_eq!(result.status, RunStatus::Complete, "{backend:?}");
            assert_eq!(result.total_succeeded, 57, "{backend:?}");
            assert!(client.insert_batch(&[serde_json::json!({"id": "late"})]).is_err());
        }
    }
}
