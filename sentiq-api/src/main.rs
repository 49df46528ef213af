//! sentiq - command-line entry point
//!
//! Starts the in-process broker and worker, issues one request through the
//! correlation bridge and prints the result as JSON on stdout. Logs go to
//! stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use sentiq_api::{LocalService, Record};
use sentiq_common::config::SentiqConfig;

/// Command-line arguments for sentiq
#[derive(Parser, Debug)]
#[command(name = "sentiq")]
#[command(about = "Sentiment analysis over a request/response message bridge")]
#[command(version)]
struct Args {
    /// Config file (TOML); falls back to SENTIQ_CONFIG, then the user config dir
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the worker's reply
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify one text
    PredictText {
        text: String,
        /// Checkpoint file name in the checkpoints directory
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Classify every string in a JSON array file
    PredictFile {
        path: PathBuf,
        #[arg(long)]
        checkpoint: Option<String>,
    },
    /// Classify one text with the ensemble model
    PredictTextEnsemble { text: String },
    /// Classify every string in a JSON array file with the ensemble model
    PredictFileEnsemble { path: PathBuf },
    /// Prepare a labelled dataset from a JSON array of records
    PrepareDataset {
        path: PathBuf,
        #[arg(long)]
        text_column: String,
        #[arg(long)]
        sentiment_column: String,
    },
    /// List available checkpoints
    Checkpoints,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing before config resolution so its messages are kept
    let log_filter = sentiq_api::logging::init();

    let mut config = SentiqConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(secs) = args.timeout_secs {
        config.bridge.timeout_secs = secs;
        config.validate().context("Invalid --timeout-secs")?;
    }
    log_filter
        .apply_configured(&config.logging.level)
        .context("Failed to apply logging.level")?;

    info!("Starting sentiq v{}", env!("CARGO_PKG_VERSION"));

    let service = LocalService::start(&config);
    let outcome = run_command(&service, args.command).await;
    let stats = service.shutdown().await?;
    info!(processed = stats.processed, failed = stats.failed, "Done");

    print_json(&outcome?)
}

async fn run_command(service: &LocalService, command: Command) -> Result<Value> {
    let client = service.client();
    let output = match command {
        Command::PredictText { text, checkpoint } => {
            let letter = client.predict_text(&text, checkpoint.as_deref()).await?;
            json!({ "result": letter })
        }
        Command::PredictFile { path, checkpoint } => {
            let texts: Vec<String> = read_json(&path)?;
            let letters = client.predict_texts(&texts, checkpoint.as_deref()).await?;
            json!({ "results": labelled(&texts, &letters) })
        }
        Command::PredictTextEnsemble { text } => {
            let letter = client.predict_text_ensemble(&text).await?;
            json!({ "result": letter })
        }
        Command::PredictFileEnsemble { path } => {
            let texts: Vec<String> = read_json(&path)?;
            let letters = client.predict_texts_ensemble(&texts).await?;
            json!({ "results": labelled(&texts, &letters) })
        }
        Command::PrepareDataset { path, text_column, sentiment_column } => {
            let records: Vec<Record> = read_json(&path)?;
            let processed = client
                .prepare_dataset(&records, &text_column, &sentiment_column)
                .await?;
            json!({ "processed_data": processed })
        }
        Command::Checkpoints => {
            json!({ "checkpoints": service.models().available_checkpoints() })
        }
    };
    Ok(output)
}

fn labelled(texts: &[String], letters: &[String]) -> Vec<Value> {
    texts
        .iter()
        .zip(letters)
        .map(|(text, sentiment)| json!({ "text": text, "sentiment": sentiment }))
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
