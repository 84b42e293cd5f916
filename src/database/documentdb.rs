use anyhow::Context;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use tempfile::TempDir;
use tracing::info;

use crate::database::{DataStoreClient, Target, document_key, not_open};
use crate::error::InsertError;

/// Provisioned throughput per collection, keyed by namespace.
static OFFERS: TableDefinition<&str, u64> = TableDefinition::new("__offers");

/// DocumentDB-style collection stored in a redb file, one document per key.
pub struct DocumentDb {
    target: Target,
    namespace: String,
    open: Option<Open>,
}

struct Open {
    db: Database,
    _dir: Option<TempDir>,
}

impl DocumentDb {
    pub fn new(target: Target) -> Self {
        let namespace = target.namespace();
        DocumentDb {
            target,
            namespace,
            open: None,
        }
    }

    fn collection(&self) -> TableDefinition<'_, &'static str, &'static str> {
        TableDefinition::new(&self.namespace)
    }

    #[cfg(test)]
    fn count(&self) -> anyhow::Result<u64> {
        use redb::{ReadableDatabase, ReadableTableMetadata};
        let open = self.open.as_ref().context("not initialized")?;
        let tx = open.db.begin_read()?;
        Ok(tx.open_table(self.collection())?.len()?)
    }
}

impl DataStoreClient for DocumentDb {
    fn init(&mut self) -> anyhow::Result<u64> {
        self.target.validate()?;
        let (dir, guard) = self.target.account_dir()?;
        let path = dir.join("documents.redb");
        let db = Database::create(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let throughput = self.target.throughput;
        let tx = db.begin_write()?;
        {
            let mut offers = tx.open_table(OFFERS)?;
            let current = offers.get(self.namespace.as_str())?.map(|v| v.value());
            match current {
                Some(_) if self.target.cleanup_on_start => {
                    info!("Recreating collection {} with {} RU/s", self.namespace, throughput);
                    tx.delete_table(self.collection())?;
                    tx.open_table(self.collection())?;
                    offers.insert(self.namespace.as_str(), throughput)?;
                }
                None => {
                    info!("Creating collection {} with {} RU/s", self.namespace, throughput);
                    tx.open_table(self.collection())?;
                    offers.insert(self.namespace.as_str(), throughput)?;
                }
                Some(provisioned) if provisioned != throughput => {
                    info!(
                        "Replacing offer of collection {}: {} -> {} RU/s",
                        self.namespace, provisioned, throughput
                    );
                    offers.insert(self.namespace.as_str(), throughput)?;
                }
                Some(_) => info!("Found collection {} with {} RU/s", self.namespace, throughput),
            }
        }
        tx.commit()
            .with_context(|| format!("failed to provision collection {}", self.namespace))?;

        self.open = Some(Open { db, _dir: guard });
        Ok(throughput)
    }

    fn insert_batch(&self, documents: &[Value]) -> Result<(), InsertError> {
        let open = self.open.as_ref().ok_or_else(not_open)?;
        let pk = self.target.partition_key.as_deref();

        let tx = open.db.begin_write().map_err(InsertError::fatal)?;
        {
            let mut table = tx.open_table(self.collection()).map_err(classify)?;
            for doc in documents {
                let key = document_key(doc, self.id_field(), pk)?;
                if table.get(key.as_str()).map_err(classify)?.is_some() {
                    return Err(InsertError::rejected(format!(
                        "conflict: document {key} already exists"
                    )));
                }
                let body = serde_json::to_string(doc).map_err(InsertError::rejected)?;
                table.insert(key.as_str(), body.as_str()).map_err(classify)?;
            }
        }
        tx.commit().map_err(classify)
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        if self.target.cleanup_on_finish {
            info!("Deleting collection {}", self.namespace);
            let tx = open.db.begin_write()?;
            tx.delete_table(self.collection())?;
            {
                let mut offers = tx.open_table(OFFERS)?;
                offers.remove(self.namespace.as_str())?;
            }
            tx.commit()?;
        }
        Ok(())
    }
}

/// Storage failures leave the database file unusable; anything else only fails the call.
fn classify(err: impl Into<redb::Error>) -> InsertError {
    match err.into() {
        e @ (redb::Error::Io(_) | redb::Error::PreviousIo | redb::Error::Corrupted(_)) => {
            InsertError::fatal(e)
        }
        e => InsertError::rejected(e),
    }
}
