use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::database::DatabaseType;
use crate::error::BenchmarkError;

/// Benchmark run configuration, read from a JSON file with PascalCase keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BenchmarkConfig {
    /// Account name identifying the target.
    pub cosmos_db_name: String,
    pub cosmos_db_api: DatabaseType,
    #[serde(default)]
    pub authorization_key: String,
    pub database_name: String,
    pub collection_name: String,
    /// Desired provisioned throughput of the collection.
    #[serde(default)]
    pub collection_throughput: u64,
    pub number_of_documents_to_insert: i64,
    #[serde(default)]
    pub partition_key: Option<String>,
    #[serde(default)]
    pub should_cleanup_on_start: bool,
    #[serde(default)]
    pub should_cleanup_on_finish: bool,
    pub document_template_file: PathBuf,
    #[serde(default)]
    pub degree_of_parallelism: Parallelism,
    #[serde(default)]
    pub mongo_insert_many: bool,
    /// Documents per insert-many call; 0 inserts a worker's whole share in one call.
    #[serde(default)]
    pub mongo_insert_many_batch_size: u64,
    /// Where the embedded backends keep their files. A temporary directory when unset.
    #[serde(default)]
    pub data_directory: Option<PathBuf>,
}

impl BenchmarkConfig {
    pub fn load(path: &Path) -> Result<Self, BenchmarkError> {
        let file = std::fs::File::open(path).map_err(|e| {
            BenchmarkError::config(format!("failed to open config file {}: {e}", path.display()))
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| {
            BenchmarkError::config(format!("failed to parse config file {}: {e}", path.display()))
        })
    }

    pub fn total_documents(&self) -> Result<u64, BenchmarkError> {
        u64::try_from(self.number_of_documents_to_insert).map_err(|_| {
            BenchmarkError::config(format!(
                "number of documents to insert must not be negative, got {}",
                self.number_of_documents_to_insert
            ))
        })
    }

    /// Document property holding the partition key value, without the path prefix.
    pub fn partition_key_property(&self) -> Option<String> {
        self.partition_key
            .as_deref()
            .map(|key| key.trim_start_matches('/'))
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
    }

    pub fn insert_mode(&self) -> InsertMode {
        if self.mongo_insert_many {
            InsertMode::Many {
                batch_size: self.mongo_insert_many_batch_size,
            }
        } else {
            InsertMode::One
        }
    }
}

/// Requested number of workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawParallelism")]
pub enum Parallelism {
    /// Derive the worker count from the capacity units reported by the backend.
    #[default]
    Auto,
    Explicit(i64),
}

const AUTO_SENTINEL: i64 = -1;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawParallelism {
    Number(i64),
    Text(String),
}

impl TryFrom<RawParallelism> for Parallelism {
    type Error = String;

    fn try_from(raw: RawParallelism) -> Result<Self, Self::Error> {
        match raw {
            RawParallelism::Number(n) => Ok(Parallelism::from(n)),
            RawParallelism::Text(s) => s.parse(),
        }
    }
}

impl From<i64> for Parallelism {
    fn from(n: i64) -> Self {
        if n == AUTO_SENTINEL {
            Parallelism::Auto
        } else {
            Parallelism::Explicit(n)
        }
    }
}

impl FromStr for Parallelism {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Parallelism::Auto);
        }
        s.parse::<i64>()
            .map(Parallelism::from)
            .map_err(|_| format!("expected \"auto\" or an integer, got {s:?}"))
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Auto => f.write_str("auto"),
            Parallelism::Explicit(n) => write!(f, "{n}"),
        }
    }
}

/// How documents are grouped into insert calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    One,
    Many { batch_size: u64 },
}

impl InsertMode {
    /// Sub-batch size a worker inserting `count` documents should use.
    pub fn batch_size_for(&self, count: u64) -> u64 {
        match *self {
            InsertMode::One => 1,
            InsertMode::Many { batch_size: 0 } => count.max(1),
            InsertMode::Many { batch_size } => batch_size,
        }
    }
}

impl fmt::Display for InsertMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertMode::One => f.write_str("InsertOne"),
            InsertMode::Many { batch_size: 0 } => f.write_str("InsertMany (whole share per call)"),
            InsertMode::Many { batch_size } => write!(f, "InsertMany (batch: {batch_size})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "CosmosDbName": "bench",
        "CosmosDbApi": "MongoDb",
        "AuthorizationKey": "secret",
        "DatabaseName": "db",
        "CollectionName": "docs",
        "CollectionThroughput": 10000,
        "NumberOfDocumentsToInsert": 1000,
        "PartitionKey": "/pk",
        "ShouldCleanupOnStart": true,
        "ShouldCleanupOnFinish": false,
        "DocumentTemplateFile": "sample.json",
        "DegreeOfParallelism": -1,
        "MongoInsertMany": true,
        "MongoInsertManyBatchSize": 50
    }"#;

    #[test]
    fn parses_original_config_layout() {
        let config: BenchmarkConfig = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.cosmos_db_api, DatabaseType::MongoDb);
        assert_eq!(config.degree_of_parallelism, Parallelism::Auto);
        assert_eq!(config.partition_key_property().as_deref(), Some("pk"));
        assert_eq!(config.insert_mode(), InsertMode::Many { batch_size: 50 });
        assert_eq!(config.total_documents().unwrap(), 1000);
        assert!(config.data_directory.is_none());
    }

    #[test]
    fn parallelism_accepts_numbers_and_auto() {
        let p: Parallelism = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(p, Parallelism::Auto);
        let p: Parallelism = serde_json::from_str("8").unwrap();
        assert_eq!(p, Parallelism::Explicit(8));
        let p: Parallelism = serde_json::from_str("0").unwrap();
        assert_eq!(p, Parallelism::Explicit(0));
        assert!(serde_json::from_str::<Parallelism>("\"many\"").is_err());
        assert_eq!("AUTO".parse::<Parallelism>().unwrap(), Parallelism::Auto);
        assert_eq!("-1".parse::<Parallelism>().unwrap(), Parallelism::Auto);
    }

    #[test]
    fn negative_document_count_is_a_configuration_error() {
        let mut config: BenchmarkConfig = serde_json::from_str(SAMPLE).unwrap();
        config.number_of_documents_to_insert = -5;
        assert!(matches!(
            config.total_documents(),
            Err(BenchmarkError::Configuration(_))
        ));
    }

    #[test]
    fn empty_partition_key_is_ignored() {
        let mut config: BenchmarkConfig = serde_json::from_str(SAMPLE).unwrap();
        config.partition_key = Some(String::new());
        assert_eq!(config.partition_key_property(), None);
    }

    #[test]
    fn batch_sizes_follow_insert_mode() {
        assert_eq!(InsertMode::One.batch_size_for(100), 1);
        assert_eq!(InsertMode::Many { batch_size: 0 }.batch_size_for(100), 100);
        assert_eq!(InsertMode::Many { batch_size: 0 }.batch_size_for(0), 1);
        assert_eq!(InsertMode::Many { batch_size: 30 }.batch_size_for(100), 30);
    }
}
