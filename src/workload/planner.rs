use serde::Serialize;

use crate::config::Parallelism;
use crate::error::BenchmarkError;

/// One worker is started for every this many capacity units.
pub const CAPACITY_UNITS_PER_WORKER: u64 = 1000;
pub const MAX_DERIVED_WORKERS: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyBasis {
    Explicit,
    DerivedFromCapacity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConcurrencyDecision {
    pub worker_count: usize,
    pub basis: ConcurrencyBasis,
}

pub fn plan(
    capacity_units: u64,
    parallelism: Parallelism,
) -> Result<ConcurrencyDecision, BenchmarkError> {
    match parallelism {
        Parallelism::Auto => {
            let derived = capacity_units / CAPACITY_UNITS_PER_WORKER;
            let worker_count = usize::try_from(derived)
                .unwrap_or(MAX_DERIVED_WORKERS)
                .clamp(1, MAX_DERIVED_WORKERS);
            Ok(ConcurrencyDecision {
                worker_count,
                basis: ConcurrencyBasis::DerivedFromCapacity,
            })
        }
        Parallelism::Explicit(n) if n >= 1 => Ok(ConcurrencyDecision {
            worker_count: usize::try_from(n).map_err(|_| {
                BenchmarkError::config(format!("degree of parallelism {n} is too large"))
            })?,
            basis: ConcurrencyBasis::Explicit,
        }),
        Parallelism::Explicit(n) => Err(BenchmarkError::config(format!(
            "degree of parallelism must be at least 1 (or -1 for auto), got {n}"
        ))),
    }
}
