use crate::error::BenchmarkError;

/// Per-worker share of the documents to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkPlan {
    total_documents: u64,
    per_worker_counts: Vec<u64>,
}

impl BenchmarkPlan {
    pub fn total_documents(&self) -> u64 {
        self.total_documents
    }

    pub fn worker_count(&self) -> usize {
        self.per_worker_counts.len()
    }

    pub fn per_worker_counts(&self) -> &[u64] {
        &self.per_worker_counts
    }
}

/// Splits `total_documents` over `worker_count` workers. The first
/// `total_documents % worker_count` workers get one extra document.
pub fn split(total_documents: u64, worker_count: usize) -> Result<BenchmarkPlan, BenchmarkError> {
    if worker_count == 0 {
        return Err(BenchmarkError::config("worker count must be at least 1"));
    }
    let workers = worker_count as u64;
    let base = total_documents / workers;
    let remainder = total_documents % workers;

    let per_worker_counts = (0..workers)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect();

    Ok(BenchmarkPlan {
        total_documents,
        per_worker_counts,
    })
}
