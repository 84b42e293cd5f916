use anyhow::Context;
use serde_json::Value;
use tempfile::TempDir;
use tracing::info;

use crate::database::{DataStoreClient, Target, document_key, not_open};
use crate::error::InsertError;

/// The Mongo API does not expose provisioned throughput, so a fixed figure is reported.
const REPORTED_CAPACITY_UNITS: u64 = 10_000;

/// Mongo-style collection stored as a sled tree.
pub struct MongoDb {
    target: Target,
    open: Option<Open>,
}

struct Open {
    db: sled::Db,
    collection: sled::Tree,
    _dir: Option<TempDir>,
}

impl MongoDb {
    pub fn new(target: Target) -> Self {
        MongoDb { target, open: None }
    }

    fn insert_one(collection: &sled::Tree, doc: &Value) -> Result<(), InsertError> {
        let key = document_key(doc, "_id", None)?;
        let body = serde_json::to_vec(doc).map_err(InsertError::rejected)?;
        match collection.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(body)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(duplicate_key(&key)),
            Err(e) => Err(classify(e)),
        }
    }

    fn insert_many(collection: &sled::Tree, documents: &[Value]) -> Result<(), InsertError> {
        let mut batch = sled::Batch::default();
        for doc in documents {
            let key = document_key(doc, "_id", None)?;
            if collection.contains_key(key.as_bytes()).map_err(classify)? {
                return Err(duplicate_key(&key));
            }
            let body = serde_json::to_vec(doc).map_err(InsertError::rejected)?;
            batch.insert(key.as_bytes(), body);
        }
        collection.apply_batch(batch).map_err(classify)
    }
}

impl DataStoreClient for MongoDb {
    fn init(&mut self) -> anyhow::Result<u64> {
        self.target.validate()?;
        let (dir, guard) = self.target.account_dir()?;
        let path = dir.join("mongo");
        let db = sled::open(&path).with_context(|| format!("failed to open {}", path.display()))?;

        let namespace = self.target.namespace();
        let exists = db
            .tree_names()
            .iter()
            .any(|name| &name[..] == namespace.as_bytes());
        if exists && self.target.cleanup_on_start {
            info!("Dropping collection {}", namespace);
            db.drop_tree(namespace.as_bytes())?;
        }
        if exists && !self.target.cleanup_on_start {
            info!("Found collection {}", namespace);
        } else {
            info!("Creating collection {}", namespace);
        }
        let collection = db.open_tree(namespace.as_bytes())?;

        self.open = Some(Open {
            db,
            collection,
            _dir: guard,
        });
        Ok(REPORTED_CAPACITY_UNITS)
    }

    fn insert_batch(&self, documents: &[Value]) -> Result<(), InsertError> {
        let open = self.open.as_ref().ok_or_else(not_open)?;
        match documents {
            [doc] => Self::insert_one(&open.collection, doc),
            docs => Self::insert_many(&open.collection, docs),
        }
    }

    fn dispose(&mut self) -> anyhow::Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        open.collection.flush()?;
        if self.target.cleanup_on_finish {
            let namespace = self.target.namespace();
            info!("Deleting collection {}", namespace);
            open.db.drop_tree(namespace.as_bytes())?;
        }
        Ok(())
    }

    fn id_field(&self) -> &str {
        "_id"
    }
}

fn duplicate_key(key: &str) -> InsertError {
    InsertError::rejected(format!("duplicate key error: _id {key}"))
}

fn classify(err: sled::Error) -> InsertError {
    match err {
        sled::Error::Unsupported(_) => InsertError::rejected(err),
        _ => InsertError::fatal(err),
    }
}
