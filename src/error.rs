use thiserror::Error;

/// Errors that end a benchmark run before any worker is started.
#[derive(Debug, Error)]
pub enum BenchmarkError {
    /// Invalid partitioning, concurrency or configuration file input.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The backend client could not be prepared.
    #[error("initialization error: {0:#}")]
    Initialization(anyhow::Error),
}

impl BenchmarkError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchmarkError::Configuration(msg.into())
    }
}

/// Failure of a single `insert_batch` call.
#[derive(Debug, Error)]
pub enum InsertError {
    /// The backend refused the documents; the client is still usable.
    #[error("insert rejected after {inserted} documents: {reason}")]
    Rejected { inserted: u64, reason: String },

    /// The client itself is no longer usable.
    #[error("client unusable after {inserted} documents: {reason}")]
    Fatal { inserted: u64, reason: String },
}

impl InsertError {
    pub fn rejected(reason: impl ToString) -> Self {
        InsertError::Rejected {
            inserted: 0,
            reason: reason.to_string(),
        }
    }

    pub fn fatal(reason: impl ToString) -> Self {
        InsertError::Fatal {
            inserted: 0,
            reason: reason.to_string(),
        }
    }

    /// Number of documents of the failing call that were stored anyway.
    pub fn inserted(&self) -> u64 {
        match self {
            InsertError::Rejected { inserted, .. } | InsertError::Fatal { inserted, .. } => {
                *inserted
            }
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, InsertError::Fatal { .. })
    }
}
