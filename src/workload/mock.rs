use std::collections::HashMap;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use anyhow::bail;
use serde_json::Value;

use crate::database::DataStoreClient;
use crate::error::InsertError;

/// Scriptable client. Call counts are tracked per thread, so each worker sees its own
/// sequence of failures.
#[derive(Default)]
pub struct MockClient {
    pub capacity_units: u64,
    pub fail_init: bool,
    /// Reject every n-th insert call of a thread.
    pub reject_every: Option<u64>,
    /// Fail fatally once the named thread (any thread when empty) inserted this many documents.
    pub fatal_after: Option<(String, u64)>,
    /// Fail the n-th insert call of a thread after storing only part of its documents.
    pub partial_failure: Option<PartialFailure>,
    pub calls: Mutex<HashMap<ThreadId, (u64, u64)>>,
    pub batches: Mutex<Vec<usize>>,
    pub disposals: u32,
}

#[derive(Clone, Copy)]
pub struct PartialFailure {
    pub call: u64,
    pub inserted: u64,
    pub fatal: bool,
}

impl MockClient {
    pub fn calls(&self) -> u64 {
        self.calls.lock().unwrap().values().map(|(calls, _)| calls).sum()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

impl DataStoreClient for MockClient {
    fn init(&mut self) -> anyhow::Result<u64> {
        if self.fail_init {
            bail!("collection does not exist");
        }
        Ok(self.capacity_units)
    }

    fn insert_batch(&self, documents: &[Value]) -> Result<(), InsertError> {
        self.batches.lock().unwrap().push(documents.len());
        let mut counts = self.calls.lock().unwrap();
        let (calls, inserted_total) = counts.entry(thread::current().id()).or_default();
        *calls += 1;

        if let Some((name, after)) = &self.fatal_after {
            let matches = name.is_empty() || thread::current().name() == Some(name.as_str());
            if matches && *inserted_total >= *after {
                return Err(InsertError::fatal("connection closed"));
            }
        }
        if let Some(p) = self.partial_failure.filter(|p| p.call == *calls) {
            let inserted = p.inserted.min(documents.len() as u64);
            *inserted_total += inserted;
            let reason = "request timed out".to_owned();
            return Err(if p.fatal {
                InsertError::Fatal { inserted, reason }
            } else {
                InsertError::Rejected { inserted, reason }
            });
        }
        if self.reject_every.is_some_and(|n| *calls % n == 0) {
            return Err(InsertError::rejected("request rate is large"));
        }
        *inserted_total += documents.len() as u64;
        Ok(())
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        self.disposals += 1;
        Ok(())
    }
}
