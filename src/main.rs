mod config;
mod database;
mod error;
mod generator;
mod workload;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{BenchmarkConfig, Parallelism};
use crate::database::{DatabaseType, get_client};
use crate::generator::DocumentTemplate;
use crate::workload::RunStatus;
use crate::workload::worker::StopSignal;

/// Measures document insert throughput of a DocumentDB or Mongo style backend.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON benchmark configuration
    config: PathBuf,

    /// Backend to use instead of the configured one
    #[arg(short = 'b', long, value_enum)]
    backend: Option<DatabaseType>,

    /// Number of documents to insert
    #[arg(short = 'n', long, allow_negative_numbers = true)]
    documents: Option<i64>,

    /// Worker count, or "auto" to derive it from capacity units
    #[arg(short = 't', long, allow_negative_numbers = true)]
    parallelism: Option<Parallelism>,

    /// Insert documents in batches of this size (0 inserts a worker's whole share at once)
    #[arg(long)]
    batch_size: Option<u64>,

    /// Stop workers after this long, e.g. "30s" or "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    max_duration: Option<Duration>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Copy, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn apply(&self, config: &mut BenchmarkConfig) {
        if let Some(backend) = self.backend {
            config.cosmos_db_api = backend;
        }
        if let Some(documents) = self.documents {
            config.number_of_documents_to_insert = documents;
        }
        if let Some(parallelism) = self.parallelism {
            config.degree_of_parallelism = parallelism;
        }
        if let Some(batch_size) = self.batch_size {
            config.mongo_insert_many = true;
            config.mongo_insert_many_batch_size = batch_size;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut config = BenchmarkConfig::load(&cli.config)?;
    cli.apply(&mut config);

    info!("docbencher starting...");
    info!("Configuration: {}", cli.config.display());
    info!("Account: {}", config.cosmos_db_name);
    info!("API: {:?}", config.cosmos_db_api);
    info!("Collection: {}.{}", config.database_name, config.collection_name);
    info!("Documents: {}", config.number_of_documents_to_insert);
    info!("Parallelism: {}", config.degree_of_parallelism);

    let template = DocumentTemplate::load(&config.document_template_file)?;
    let stop = match cli.max_duration {
        Some(d) => StopSignal::with_deadline(Instant::now() + d),
        None => StopSignal::default(),
    };

    let mut client = get_client(config.cosmos_db_api, &config);
    let result = workload::execute(&config, &template, client.as_mut(), &stop)?;
    if result.is_partial_failure() {
        warn!("Benchmark ended with aborted workers: {}", result.status);
    } else if let RunStatus::Stopped { .. } = result.status {
        warn!("Benchmark hit its deadline: {}", result.status);
    }

    match cli.format {
        OutputFormat::Text => println!("{result}"),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to render result")?
        ),
    }
    Ok(())
}
