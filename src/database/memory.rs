use std::collections::BTreeMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::info;

use crate::database::{DataStoreClient, Target, document_key, not_open};
use crate::error::InsertError;

/// In-process collection, useful for dry runs of the harness itself.
pub struct Memory {
    target: Target,
    data: Option<RwLock<BTreeMap<String, Value>>>,
}

impl Memory {
    pub fn new(target: Target) -> Self {
        Memory { target, data: None }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.data
            .as_ref()
            .map_or(0, |d| d.read().unwrap_or_else(|e| e.into_inner()).len())
    }
}

impl DataStoreClient for Memory {
    fn init(&mut self) -> anyhow::Result<u64> {
        self.target.validate()?;
        if self.target.cleanup_on_start || self.data.is_none() {
            info!("Creating in-memory collection {}", self.target.namespace());
            self.data = Some(RwLock::default());
        }
        Ok(self.target.throughput)
    }

    fn insert_batch(&self, documents: &[Value]) -> Result<(), InsertError> {
        let data = self.data.as_ref().ok_or_else(not_open)?;
        let pk = self.target.partition_key.as_deref();
        let keys = documents
            .iter()
            .map(|doc| document_key(doc, self.id_field(), pk))
            .collect::<Result<Vec<_>, _>>()?;

        let mut data = data.write().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = keys.iter().find(|k| data.contains_key(k.as_str())) {
            return Err(InsertError::rejected(format!(
                "conflict: document {key} already exists"
            )));
        }
        for (key, doc) in keys.into_iter().zip(documents) {
            data.insert(key, doc.clone());
        }
        Ok(())
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        if self.data.take().is_some() && self.target.cleanup_on_finish {
            info!("Deleting in-memory collection {}", self.target.namespace());
        }
        Ok(())
    }
}
