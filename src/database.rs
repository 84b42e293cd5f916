mod documentdb;
mod memory;
mod mongodb;

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::Value;
use tempfile::TempDir;

use crate::config::BenchmarkConfig;
use crate::database::documentdb::DocumentDb;
use crate::database::memory::Memory;
use crate::database::mongodb::MongoDb;
use crate::error::InsertError;

/// Backend a benchmark run writes to.
///
/// All backends must be safe to call concurrently from every worker.
pub trait DataStoreClient: Send + Sync {
    /// Prepares the target collection and returns its capacity units.
    fn init(&mut self) -> Result<u64>;

    /// Inserts the given documents in one call.
    fn insert_batch(&self, documents: &[Value]) -> Result<(), InsertError>;

    /// Releases the client. Calling it again is a no-op.
    fn dispose(&mut self) -> Result<()>;

    /// Property holding each document's unique identifier.
    fn id_field(&self) -> &str {
        "id"
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Deserialize)]
// Update database::get_client when adding new variation
pub enum DatabaseType {
    DocumentDb,
    MongoDb,
    Memory,
}

pub fn get_client(database: DatabaseType, config: &BenchmarkConfig) -> Box<dyn DataStoreClient> {
    let target = Target::from_config(config);
    match database {
        DatabaseType::DocumentDb => Box::new(DocumentDb::new(target)),
        DatabaseType::MongoDb => Box::new(MongoDb::new(target)),
        DatabaseType::Memory => Box::new(Memory::new(target)),
    }
}

/// Identity and provisioning settings of the collection under test.
#[derive(Debug, Clone)]
pub struct Target {
    pub account: String,
    pub authorization_key: String,
    pub database: String,
    pub collection: String,
    pub throughput: u64,
    pub partition_key: Option<String>,
    pub cleanup_on_start: bool,
    pub cleanup_on_finish: bool,
    pub data_directory: Option<PathBuf>,
}

impl Target {
    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Target {
            account: config.cosmos_db_name.clone(),
            authorization_key: config.authorization_key.clone(),
            database: config.database_name.clone(),
            collection: config.collection_name.clone(),
            throughput: config.collection_throughput,
            partition_key: config.partition_key_property(),
            cleanup_on_start: config.should_cleanup_on_start,
            cleanup_on_finish: config.should_cleanup_on_finish,
            data_directory: config.data_directory.clone(),
        }
    }

    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.account.is_empty(), "account name must not be empty");
        ensure!(
            self.account
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "account name {:?} may only contain ASCII letters, digits, '-' and '_'",
            self.account
        );
        ensure!(
            !self.authorization_key.is_empty(),
            "authorization key for account {} is missing",
            self.account
        );
        ensure!(!self.database.is_empty(), "database name must not be empty");
        ensure!(!self.collection.is_empty(), "collection name must not be empty");
        Ok(())
    }

    /// Directory holding this account's files. The returned guard, if any, owns a
    /// temporary directory that is removed when dropped.
    pub fn account_dir(&self) -> Result<(PathBuf, Option<TempDir>)> {
        match &self.data_directory {
            Some(root) => {
                let dir = root.join(&self.account);
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                Ok((dir, None))
            }
            None => {
                let tmp = TempDir::new().context("failed to create temporary data directory")?;
                Ok((tmp.path().to_path_buf(), Some(tmp)))
            }
        }
    }
}

/// Storage key of a generated document: its id, prefixed by its partition key value
/// when the collection is partitioned.
pub(crate) fn document_key(
    doc: &Value,
    id_field: &str,
    partition_key: Option<&str>,
) -> Result<String, InsertError> {
    let field = |name: &str| match doc.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(InsertError::rejected(format!(
            "document is missing required property {name:?}"
        ))),
    };
    let id = field(id_field)?;
    match partition_key {
        Some(pk) => Ok(format!("{}/{id}", field(pk)?)),
        None => Ok(id),
    }
}

pub(crate) fn not_open() -> InsertError {
    InsertError::fatal("client is not initialized or has been disposed")
}
