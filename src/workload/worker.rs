use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::database::DataStoreClient;
use crate::generator::DocumentGen;

/// Failure descriptions kept per worker.
pub const MAX_FAILURE_SAMPLES: usize = 10;

/// Cooperative stop request, checked by workers between sub-batches.
/// The default signal never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopSignal {
    deadline: Option<Instant>,
}

impl StopSignal {
    pub fn with_deadline(deadline: Instant) -> Self {
        StopSignal {
            deadline: Some(deadline),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// What one worker achieved.
#[derive(Debug, Clone, Serialize)]
pub struct InsertOutcome {
    pub worker_id: usize,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failure_samples: Vec<String>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Set when the client became unusable and the worker gave up.
    pub fatal: Option<String>,
    /// Set when the worker was stopped before inserting its whole share.
    pub cancelled: bool,
    /// Latency of each insert call.
    #[serde(skip)]
    pub latency_hist_micro_sec: Histogram<u64>,
}

impl InsertOutcome {
    pub fn new(worker_id: usize, latency_hist_micro_sec: Histogram<u64>) -> Self {
        InsertOutcome {
            worker_id,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            failure_samples: Vec::new(),
            elapsed: Duration::ZERO,
            fatal: None,
            cancelled: false,
            latency_hist_micro_sec,
        }
    }

    /// Outcome of a worker that died without reporting.
    pub fn lost(worker_id: usize, latency_hist_micro_sec: Histogram<u64>, reason: String) -> Self {
        let mut outcome = InsertOutcome::new(worker_id, latency_hist_micro_sec);
        outcome.failure_samples.push(reason.clone());
        outcome.fatal = Some(reason);
        outcome
    }

    fn sample_failure(&mut self, description: String) {
        if self.failure_samples.len() < MAX_FAILURE_SAMPLES {
            self.failure_samples.push(description);
        }
    }
}

/// Inserts one partition's share of documents.
pub struct Worker<'a> {
    pub id: usize,
    pub client: &'a dyn DataStoreClient,
    pub documents: DocumentGen<'a>,
    /// Documents per insert call; 0 inserts one at a time.
    pub batch_size: u64,
    pub stop: &'a StopSignal,
}

impl Worker<'_> {
    pub fn run(&self, count: u64, latency_hist: Histogram<u64>) -> InsertOutcome {
        let mut outcome = InsertOutcome::new(self.id, latency_hist);
        if count == 0 {
            return outcome;
        }

        let batch_size = self.batch_size.max(1);
        let mut remaining = count;
        let start = Instant::now();

        while remaining > 0 {
            if self.stop.is_stopped() {
                debug!(worker = self.id, remaining, "stop requested");
                outcome.cancelled = true;
                break;
            }

            let len = remaining.min(batch_size);
            let batch = self.documents.next_batch(len as usize);
            let s = Instant::now();
            let result = self.client.insert_batch(&batch);
            let micro_sec = s.elapsed().as_micros() as u64;
            outcome.latency_hist_micro_sec.saturating_record(micro_sec.max(1));
            remaining -= len;

            match result {
                Ok(()) => {
                    outcome.attempted += len;
                    outcome.succeeded += len;
                }
                Err(err) if err.is_fatal() => {
                    // Documents the client never took are not counted as attempted.
                    let inserted = err.inserted().min(len);
                    outcome.attempted += inserted;
                    outcome.succeeded += inserted;
                    error!(worker = self.id, "worker stopped: {err}");
                    outcome.sample_failure(err.to_string());
                    outcome.fatal = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    let inserted = err.inserted().min(len);
                    outcome.attempted += len;
                    outcome.succeeded += inserted;
                    outcome.failed += len - inserted;
                    warn!(worker = self.id, "failed to insert {} documents: {err}", len - inserted);
                    outcome.sample_failure(err.to_string());
                }
            }
        }

        outcome.elapsed = start.elapsed();
        outcome
    }
}
